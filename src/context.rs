use crate::aggregate::{build_hourly_trend, build_live_list, HourlyBucket};
use crate::cache::{CacheBackend, CacheKeys, CachePolicy, Fetched};
use crate::config::Config;
use crate::correlation::{
    CorrelatedViolation, CorrelationEngine, CorrelationWindow, DeskAssignments,
};
use crate::db::EventStore;
use crate::error::{bounded, Error, Result};
use crate::hub::BroadcastHub;
use crate::utils::time::now_ts;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of probing the event store and the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub database: bool,
    pub cache: bool,
    pub timestamp: f64,
    pub uptime_secs: f64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database && self.cache
    }
}

/// Process-wide handles. Built once in `main`; the supervisor, the hub and
/// the HTTP handlers borrow it through an `Arc`.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn EventStore>,
    pub cache: Arc<CachePolicy>,
    pub engine: Arc<CorrelationEngine>,
    pub hub: Arc<BroadcastHub>,
    started_at: f64,
    degraded: AtomicBool,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn EventStore>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Result<Self> {
        let engine = CorrelationEngine::from_config(Arc::clone(&store), &config)?;
        let cache = CachePolicy::new(cache_backend, config.background.call_timeout());
        let hub = BroadcastHub::new(config.websocket.outbound_buffer);

        Ok(Self {
            config,
            store,
            cache: Arc::new(cache),
            engine: Arc::new(engine),
            hub: Arc::new(hub),
            started_at: now_ts(),
            degraded: AtomicBool::new(false),
        })
    }

    pub fn uptime_secs(&self) -> f64 {
        now_ts() - self.started_at
    }

    /// True while the last health probe found the event store unreachable
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn set_degraded(&self, degraded: bool) {
        let was = self.degraded.swap(degraded, Ordering::Relaxed);
        if was != degraded {
            if degraded {
                warn!("Event store unreachable, serving in degraded mode");
            } else {
                info!("Event store reachable again");
            }
        }
    }

    /// Re-read the desk table from config and the desk file
    pub fn reload_desks(&self) -> Result<usize> {
        let desks = DeskAssignments::from_config(&self.config.correlation)?;
        let count = desks.len();
        self.engine.replace_desks(desks);
        info!("Reloaded {} desk assignments", count);
        Ok(count)
    }

    pub async fn probe_health(&self) -> HealthReport {
        let timeout = self.config.background.call_timeout();
        let backend = self.cache.backend();
        let (database, cache) = tokio::join!(
            bounded(timeout, "store health", async { Ok(self.store.health_check().await) }),
            bounded(timeout, "cache health", async { Ok(backend.health_check().await) }),
        );

        HealthReport {
            database: database.unwrap_or(false),
            cache: cache.unwrap_or(false),
            timestamp: now_ts(),
            uptime_secs: self.uptime_secs(),
        }
    }

    /// Live violations read path: cached list, recomputed on miss
    pub async fn live_violations(
        &self,
        camera: Option<String>,
        hours: u32,
        limit: usize,
    ) -> Result<Fetched<Vec<CorrelatedViolation>>> {
        let key = CacheKeys::live_violations(camera.as_deref(), hours, limit);
        let engine = Arc::clone(&self.engine);
        let window = CorrelationWindow::last_hours(now_ts(), hours).for_camera(camera);

        let fetched = self
            .cache
            .get_or_refresh(&key, self.config.cache.ttl.live_violations(), move || async move {
                let violations = engine.correlate(&window).await?;
                Ok(build_live_list(&violations, limit))
            })
            .await;
        self.degrade_outage(fetched)
    }

    /// Hourly trend read path
    pub async fn hourly_trend(&self, hours: u32) -> Result<Fetched<Vec<HourlyBucket>>> {
        let key = CacheKeys::hourly_trend(hours);
        let engine = Arc::clone(&self.engine);

        let fetched = self
            .cache
            .get_or_refresh(&key, self.config.cache.ttl.hourly_trend(), move || async move {
                let now = now_ts();
                let violations = engine
                    .correlate(&CorrelationWindow::last_hours(now, hours))
                    .await?;
                Ok(build_hourly_trend(&violations, hours, now))
            })
            .await;
        self.degrade_outage(fetched)
    }

    // a store outage with nothing cached is reported as degraded, not empty
    fn degrade_outage<T>(&self, fetched: Result<T>) -> Result<T> {
        fetched.map_err(|e| {
            if e.is_store_outage() {
                Error::ServiceDegraded(e.to_string())
            } else {
                e
            }
        })
    }
}
