//! Key/value cache with TTLs, and the policy layer the rest of the service
//! reads and writes through.
//!
//! Backends ([`RedisCache`], [`MemoryCache`]) only move bytes. Freshness is
//! decided by [`CachePolicy`], which records each entry's TTL next to its value.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod keys;
pub mod memory;
pub mod policy;
pub mod redis_cache;

pub use self::keys::CacheKeys;
pub use self::memory::MemoryCache;
pub use self::policy::{CachePolicy, Fetched, Freshness};
pub use self::redis_cache::RedisCache;

/// Storage operations a cache backend must provide
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Raw value, `None` on miss
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value; `ttl` is a storage-level expiry
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern such as `violations:*`
    async fn delete_pattern(&self, pattern: &str) -> Result<usize>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    async fn health_check(&self) -> bool;

    /// Human readable memory usage, when the backend knows it
    async fn memory_usage(&self) -> Result<Option<String>>;

    /// Drop entries whose storage expiry has passed. Backends that expire
    /// on their own have nothing to do.
    async fn evict_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
