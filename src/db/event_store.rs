use crate::db::models::{Detection, Label};
use crate::error::Result;
use async_trait::async_trait;

/// Read-only, time-ranged access to detection events.
///
/// Implementations return an empty vector when nothing matches and reserve
/// `Error::StoreQuery` for genuine I/O or query failures.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Detections with `label` in `[start_ts, end_ts]`, optionally on one camera
    async fn query(
        &self,
        camera: Option<&str>,
        label: &Label,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<Detection>>;

    /// Cheap liveness probe
    async fn health_check(&self) -> bool;
}
