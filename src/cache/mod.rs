//! Redis-backed caching for the public pricing list.
//!
//! Every operation degrades gracefully: callers treat a cache error as a miss
//! and fall through to the database.

pub mod cache;
pub mod error;
pub mod keys;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::CacheConfig;

pub use cache::{Cache, RedisCache};
pub use error::{CacheError, CacheResult};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Initialize Redis connection pool with fault tolerance
pub async fn init_cache_pool(config: &CacheConfig) -> CacheResult<RedisPool> {
    info!(
        max_connections = config.max_connections,
        "Initializing Redis cache pool"
    );

    let client = Client::open(config.redis_url.clone()).map_err(|e| {
        error!("Failed to create Redis client: {}", e);
        CacheError::Connection(e.to_string())
    })?;

    let manager = RedisConnectionManager::new(client.get_connection_info().clone()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::Connection(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(CONNECTION_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .test_on_check_out(false)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::Connection(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        // Pricing reads fall back to Postgres while Redis is down.
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Redis cache pool initialized successfully");
    Ok(pool)
}

/// PING through a pooled connection.
pub async fn health_check(pool: &RedisPool) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}
