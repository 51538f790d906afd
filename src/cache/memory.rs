use crate::cache::CacheBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache used when no Redis URL is configured
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }
}

fn compile(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| Error::Cache(format!("Invalid key pattern {}: {}", pattern, e)))
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = MemoryEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let pattern = compile(pattern)?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        Ok(before - entries.len())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = compile(pattern)?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let current = match entries.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| Error::Cache(format!("Value at {} is not an integer", key)))?,
            None => 0,
        };
        let next = current + amount;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn memory_usage(&self) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        let bytes: usize = entries.iter().map(|(k, e)| k.len() + e.value.len()).sum();
        Ok(Some(format!("{} entries, {} bytes", entries.len(), bytes)))
    }

    async fn evict_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Evicted {} expired cache entries", evicted);
        }
        Ok(evicted)
    }
}
