//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

#[cfg(feature = "cache")]
use crate::cache::RedisPool;
use crate::queue::EventQueue;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

type CheckError = Box<dyn std::error::Error + Send + Sync>;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }

    fn insert(&mut self, name: &str, health: ComponentHealth) {
        match (health.status, self.status) {
            (ComponentState::Down, _) => self.status = HealthState::Unhealthy,
            (ComponentState::Warning, HealthState::Healthy) => self.status = HealthState::Degraded,
            _ => {}
        }
        self.checks.insert(name.to_string(), health);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application. Postgres and Redis are checked only
/// when the process is wired to them.
#[derive(Clone)]
pub struct HealthChecker {
    queue: Arc<dyn EventQueue>,
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    cache: Option<RedisPool>,
}

impl HealthChecker {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Self {
            queue,
            #[cfg(feature = "database")]
            db_pool: None,
            #[cfg(feature = "cache")]
            cache: None,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, pool: RedisPool) -> Self {
        self.cache = Some(pool);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            let health = timed("database", check_database_health(pool)).await;
            health_status.insert("database", health);
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.cache {
            // Pricing reads fall back to Postgres, so Redis is never fatal.
            let mut health = timed("cache", check_cache_health(pool)).await;
            if health.status == ComponentState::Down {
                health.status = ComponentState::Warning;
            }
            health_status.insert("cache", health);
        }

        health_status.insert("queue", self.check_queue().await);
        health_status
    }

    async fn check_queue(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(CHECK_TIMEOUT, self.queue.depth()).await {
            Ok(Ok(depth)) => {
                let details = format!(
                    "pending={} processing={} dead={}",
                    depth.pending, depth.processing, depth.dead
                );
                if depth.dead > 0 {
                    warn!(dead = depth.dead, "Dead-lettered fulfillment events awaiting operator");
                    ComponentHealth::warning(Some(start.elapsed().as_millis()), Some(details))
                } else {
                    ComponentHealth {
                        details: Some(details),
                        ..ComponentHealth::up(Some(start.elapsed().as_millis()))
                    }
                }
            }
            Ok(Err(e)) => {
                error!("Queue health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Queue health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }
}

async fn timed<F>(name: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<u128, CheckError>>,
{
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(response_time)) => ComponentHealth::up(Some(response_time)),
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(pool: &sqlx::PgPool) -> Result<u128, CheckError> {
    let start = Instant::now();
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(feature = "cache")]
pub async fn check_cache_health(pool: &RedisPool) -> Result<u128, CheckError> {
    let start = Instant::now();
    crate::cache::health_check(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryEventQueue;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));
    }

    #[test]
    fn test_worst_component_wins() {
        let mut status = HealthStatus::new();
        status.insert("a", ComponentHealth::warning(None, None));
        assert_eq!(status.status, HealthState::Degraded);
        status.insert("b", ComponentHealth::down(None));
        assert_eq!(status.status, HealthState::Unhealthy);
        status.insert("c", ComponentHealth::warning(None, None));
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_in_memory_queue_is_healthy() {
        let checker = HealthChecker::new(Arc::new(MemoryEventQueue::new()));
        let status = checker.check_health().await;
        assert!(status.is_healthy());
        assert!(status.checks.contains_key("queue"));
    }
}
