use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::CacheResult;
use super::RedisPool;

/// Typed key-value cache.
#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    /// `ttl = None` uses the cache's default TTL.
    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

/// JSON values stored in Redis.
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
    default_ttl: Duration,
}

impl RedisCache {
    pub fn new(pool: RedisPool, default_ttl: Duration) -> Self {
        Self { pool, default_ttl }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }
}

#[async_trait]
impl<T> Cache<T> for RedisCache
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => {
                debug!(key = %key, "Cache hit");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, raw, ttl).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}
