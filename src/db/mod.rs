use crate::config::DatabaseConfig;
use crate::error::Error;
use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod event_store;
pub mod models;
pub mod repositories;

pub use event_store::EventStore;
pub use repositories::TimelineRepository;

/// Owns the event store connection pool
pub struct DatabaseService {
    pub pool: Arc<PgPool>,
}

impl DatabaseService {
    /// Connect the pool; fails fast if the store is unreachable at startup
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing Database service");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| Error::StoreQuery(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL event store");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Event store view over the shared pool
    pub fn timeline(&self) -> TimelineRepository {
        TimelineRepository::new(Arc::clone(&self.pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Event store pool closed");
    }
}
