use crate::cache::CacheBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use redis::{aio::ConnectionManager, AsyncCommands};
use std::fmt;
use std::time::Duration;

/// Redis-backed cache. The connection manager reconnects on its own and is
/// cloned per call, so one instance is shared by every task and handler.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis cache at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Cache(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(format!("Failed to connect to Redis: {}", e)))?;

        info!("Successfully connected to Redis cache");

        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::Cache(format!("Redis GET {} failed: {}", key, e)))?;

        debug!("Cache {}: {}", if data.is_some() { "HIT" } else { "MISS" }, key);
        Ok(data)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        debug!("Cache SET: {} (TTL: {:?})", key, ttl);
        let mut conn = self.conn.clone();

        match ttl {
            // SETEX rejects a zero expiry
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| Error::Cache(format!("Redis SETEX {} failed: {}", key, e))),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| Error::Cache(format!("Redis SET {} failed: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: usize = conn
            .del(key)
            .await
            .map_err(|e| Error::Cache(format!("Redis DEL {} failed: {}", key, e)))?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        debug!("Deleting {} keys matching pattern: {}", keys.len(), pattern);
        let mut conn = self.conn.clone();
        conn.del(keys)
            .await
            .map_err(|e| Error::Cache(format!("Redis DEL failed: {}", e)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys(pattern)
            .await
            .map_err(|e| Error::Cache(format!("Redis KEYS {} failed: {}", pattern, e)))
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, amount)
            .await
            .map_err(|e| Error::Cache(format!("Redis INCRBY {} failed: {}", key, e)))
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                error!("Redis health check failed: {}", e);
                false
            }
        }
    }

    async fn memory_usage(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Redis INFO failed: {}", e)))?;

        Ok(info
            .lines()
            .find_map(|line| line.strip_prefix("used_memory_human:"))
            .map(|v| v.trim().to_string()))
    }
}
