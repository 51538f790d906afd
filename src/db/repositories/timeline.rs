use crate::db::event_store::EventStore;
use crate::db::models::{Detection, Label, TimelineRow};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

/// Timeline repository over the detector's `timeline` table
#[derive(Clone)]
pub struct TimelineRepository {
    pool: Arc<PgPool>,
}

impl TimelineRepository {
    /// Create a new timeline repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get detections of one label in a time range
    pub async fn get_by_label(
        &self,
        camera: Option<&str>,
        label: &Label,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<Detection>> {
        let rows = sqlx::query_as::<_, TimelineRow>(
            r#"
            SELECT timestamp, camera, source_id, data
            FROM timeline
            WHERE data->>'label' = $1
            AND timestamp >= $2 AND timestamp <= $3
            AND ($4::text IS NULL OR camera = $4)
            ORDER BY timestamp DESC
            "#,
        )
        .bind(label.store_name())
        .bind(start_ts)
        .bind(end_ts)
        .bind(camera)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::StoreQuery(format!("Failed to query {} detections: {}", label, e)))?;

        debug!("Fetched {} {} detections", rows.len(), label);

        Ok(rows.into_iter().map(Detection::from).collect())
    }
}

#[async_trait]
impl EventStore for TimelineRepository {
    async fn query(
        &self,
        camera: Option<&str>,
        label: &Label,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<Detection>> {
        self.get_by_label(camera, label, start_ts, end_ts).await
    }

    async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("Event store health check failed: {}", e);
                false
            }
        }
    }
}
