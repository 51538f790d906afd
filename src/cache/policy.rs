use crate::cache::CacheBackend;
use crate::error::{bounded, Error, Result};
use crate::utils::time::now_ts;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a lapsed value is kept in storage so it can be served stale
const DEFAULT_STALE_GRACE: Duration = Duration::from_secs(600);

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<serde_json::Value>>>>;

struct InFlight {
    generation: u64,
    outcome: SharedRefresh,
}

/// Stored form of every policy-managed value. The TTL travels with the value,
/// so freshness does not depend on the backend's own expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheEnvelope {
    pub(crate) inserted_at: f64,
    pub(crate) ttl_secs: f64,
    pub(crate) value: serde_json::Value,
}

impl CacheEnvelope {
    pub(crate) fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            inserted_at: now_ts(),
            ttl_secs: ttl.as_secs_f64(),
            value,
        }
    }

    fn is_fresh(&self, now: f64) -> bool {
        now - self.inserted_at < self.ttl_secs
    }
}

/// Where a value handed back by [`CachePolicy::get_or_refresh`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Cached and within its TTL
    Hit,
    /// Recomputed by this call or by a concurrent call it joined
    Refreshed,
    /// Refresh failed; the last stored value past its TTL
    Stale,
}

#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub freshness: Freshness,
}

/// Read-through/write-through access to a [`CacheBackend`] with recorded TTLs
/// and single-flight refreshes.
pub struct CachePolicy {
    backend: Arc<dyn CacheBackend>,
    inflight: Arc<Mutex<HashMap<String, InFlight>>>,
    generation: AtomicU64,
    call_timeout: Duration,
    stale_grace: Duration,
}

impl CachePolicy {
    pub fn new(backend: Arc<dyn CacheBackend>, call_timeout: Duration) -> Self {
        Self {
            backend,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            call_timeout,
            stale_grace: DEFAULT_STALE_GRACE,
        }
    }

    pub fn with_stale_grace(mut self, stale_grace: Duration) -> Self {
        self.stale_grace = stale_grace;
        self
    }

    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.backend)
    }

    /// Return the cached value for `key` while its recorded TTL holds;
    /// otherwise run `refresh`, store the result under `ttl` and return it.
    ///
    /// Concurrent callers for the same key share one `refresh` execution. If
    /// the refresh fails and a lapsed value is still stored, that value is
    /// returned as [`Freshness::Stale`].
    pub async fn get_or_refresh<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        refresh: F,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut stale = None;
        match self.read_envelope(key).await {
            Ok(Some(envelope)) if envelope.is_fresh(now_ts()) => {
                match serde_json::from_value::<T>(envelope.value) {
                    Ok(value) => {
                        return Ok(Fetched {
                            value,
                            freshness: Freshness::Hit,
                        })
                    }
                    Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
                }
            }
            Ok(Some(envelope)) => stale = Some(envelope.value),
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}, treating as miss: {}", key, e),
        }

        let shared = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(key) {
                Some(running) => running.outcome.clone(),
                None => {
                    let running = self.start_refresh(key, ttl, refresh);
                    let outcome = running.outcome.clone();
                    inflight.insert(key.to_string(), running);
                    outcome
                }
            }
        };

        let outcome = shared.await;

        match outcome {
            Ok(json) => Ok(Fetched {
                value: serde_json::from_value((*json).clone())?,
                freshness: Freshness::Refreshed,
            }),
            Err(e) => match stale {
                Some(value) => {
                    warn!("Refresh of {} failed, serving stale value: {}", key, e);
                    Ok(Fetched {
                        value: serde_json::from_value(value)?,
                        freshness: Freshness::Stale,
                    })
                }
                None => Err(e),
            },
        }
    }

    // Runs on its own task so the refresh completes, is stored and leaves
    // `inflight` even if every caller waiting on it is dropped. Must be called
    // with the `inflight` lock held.
    fn start_refresh<T, F, Fut>(&self, key: &str, ttl: Duration, refresh: F) -> InFlight
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let inflight = Arc::clone(&self.inflight);
        let key = key.to_string();
        let call_timeout = self.call_timeout;
        let storage_ttl = ttl + self.stale_grace;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let handle = tokio::spawn(async move {
            let store_key = key.clone();
            let outcome: Result<Arc<serde_json::Value>> = async move {
                let value = refresh().await?;
                let json = serde_json::to_value(&value)?;
                let bytes = serde_json::to_vec(&CacheEnvelope::new(json.clone(), ttl))?;
                if let Err(e) = bounded(
                    call_timeout,
                    "cache write",
                    backend.set(&store_key, bytes, Some(storage_ttl)),
                )
                .await
                {
                    warn!("Failed to store refreshed value for {}: {}", store_key, e);
                }
                debug!("Refreshed cache key {}", store_key);
                Ok(Arc::new(json))
            }
            .await;

            let mut inflight = inflight.lock().unwrap_or_else(|e| e.into_inner());
            if inflight.get(&key).map_or(false, |r| r.generation == generation) {
                inflight.remove(&key);
            }
            outcome
        });

        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Internal(format!("cache refresh task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        InFlight { generation, outcome }
    }

    /// Write-through store of a freshly computed value
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let envelope = CacheEnvelope::new(serde_json::to_value(value)?, ttl);
        let bytes = serde_json::to_vec(&envelope)?;
        bounded(
            self.call_timeout,
            "cache write",
            self.backend.set(key, bytes, Some(ttl + self.stale_grace)),
        )
        .await
    }

    /// Cached value for `key` if present and within its recorded TTL
    pub async fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_envelope(key).await? {
            Some(envelope) if envelope.is_fresh(now_ts()) => {
                Ok(Some(serde_json::from_value(envelope.value)?))
            }
            _ => Ok(None),
        }
    }

    /// Delete every key matching `pattern`
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let removed = bounded(
            self.call_timeout,
            "cache invalidate",
            self.backend.delete_pattern(pattern),
        )
        .await?;
        debug!("Invalidated {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    /// Delete entries under `patterns` that are past TTL plus stale grace or
    /// that no longer decode as an envelope.
    pub async fn purge_expired(&self, patterns: &[&str]) -> Result<usize> {
        let now = now_ts();
        let grace = self.stale_grace.as_secs_f64();
        let mut purged = bounded(
            self.call_timeout,
            "cache evict",
            self.backend.evict_expired(),
        )
        .await?;

        for pattern in patterns {
            let keys = bounded(self.call_timeout, "cache keys", self.backend.keys(pattern)).await?;
            for key in keys {
                let raw = bounded(self.call_timeout, "cache read", self.backend.get(&key)).await?;
                let dead = match raw {
                    Some(bytes) => match serde_json::from_slice::<CacheEnvelope>(&bytes) {
                        Ok(envelope) => now - envelope.inserted_at >= envelope.ttl_secs + grace,
                        // plain counters are not envelopes
                        Err(_) => std::str::from_utf8(&bytes)
                            .ok()
                            .and_then(|s| s.parse::<i64>().ok())
                            .is_none(),
                    },
                    None => false,
                };
                if dead
                    && bounded(self.call_timeout, "cache delete", self.backend.delete(&key)).await?
                {
                    purged += 1;
                }
            }
        }

        Ok(purged)
    }

    /// Key counts grouped by their first two `:` separated segments
    pub async fn key_distribution(&self) -> Result<BTreeMap<String, usize>> {
        let keys = bounded(self.call_timeout, "cache keys", self.backend.keys("*")).await?;
        let mut counts = BTreeMap::new();
        for key in keys {
            let prefix = key.splitn(3, ':').take(2).collect::<Vec<_>>().join(":");
            *counts.entry(prefix).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn read_envelope(&self, key: &str) -> Result<Option<CacheEnvelope>> {
        let raw = bounded(self.call_timeout, "cache read", self.backend.get(key)).await?;
        match raw {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::Cache(format!("Corrupt cache entry {}: {}", key, e))),
            None => Ok(None),
        }
    }
}
