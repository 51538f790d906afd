//! In-memory collaborators for unit tests

use crate::cache::CacheBackend;
use crate::db::models::{Detection, Label, SubLabel};
use crate::db::EventStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn phone(timestamp: f64, camera: &str, zones: &[&str], source_id: &str) -> Detection {
    Detection {
        timestamp,
        camera: camera.to_string(),
        label: Label::CellPhone,
        sub_label: None,
        zones: zones.iter().map(|z| z.to_string()).collect(),
        source_id: source_id.to_string(),
    }
}

pub(crate) fn sighting(
    timestamp: f64,
    camera: &str,
    label: Label,
    name: Option<&str>,
    score: Option<f64>,
) -> Detection {
    Detection {
        timestamp,
        camera: camera.to_string(),
        label,
        sub_label: name.map(|name| SubLabel {
            name: name.to_string(),
            score,
        }),
        zones: Vec::new(),
        source_id: format!("{}-{}", camera, timestamp),
    }
}

pub(crate) fn face(timestamp: f64, camera: &str, name: &str, score: f64) -> Detection {
    sighting(timestamp, camera, Label::Face, Some(name), Some(score))
}

/// Event store over a mutable in-memory detection list
#[derive(Default)]
pub(crate) struct MemoryEventStore {
    detections: Mutex<Vec<Detection>>,
    queries: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryEventStore {
    pub(crate) fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections: Mutex::new(detections),
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn push(&self, detection: Detection) {
        self.detections.lock().unwrap().push(detection);
    }

    pub(crate) fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn query(
        &self,
        camera: Option<&str>,
        label: &Label,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<Detection>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut rows: Vec<Detection> = self
            .detections
            .lock()
            .unwrap()
            .iter()
            .filter(|d| &d.label == label)
            .filter(|d| camera.map_or(true, |c| d.camera == c))
            .filter(|d| d.timestamp >= start_ts && d.timestamp <= end_ts)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        Ok(rows)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Event store that is down; can be brought back with `recover`
#[derive(Default)]
pub(crate) struct FailingEventStore {
    recovered: AtomicBool,
    inner: MemoryEventStore,
}

impl FailingEventStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn recover(&self) {
        self.recovered.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn query(
        &self,
        camera: Option<&str>,
        label: &Label,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<Detection>> {
        if self.recovered.load(Ordering::SeqCst) {
            return self.inner.query(camera, label, start_ts, end_ts).await;
        }
        Err(Error::StoreQuery("connection refused".to_string()))
    }

    async fn health_check(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }
}

/// Cache backend whose every call fails
pub(crate) struct FailingCache;

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::Cache("unreachable".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        Err(Error::Cache("unreachable".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::Cache("unreachable".to_string()))
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<usize> {
        Err(Error::Cache("unreachable".to_string()))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
        Err(Error::Cache("unreachable".to_string()))
    }

    async fn increment(&self, _key: &str, _amount: i64) -> Result<i64> {
        Err(Error::Cache("unreachable".to_string()))
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn memory_usage(&self) -> Result<Option<String>> {
        Err(Error::Cache("unreachable".to_string()))
    }
}
