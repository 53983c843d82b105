pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

#[cfg(feature = "database")]
pub mod event_queue_repository;
#[cfg(feature = "database")]
pub mod ledger_repository;
#[cfg(feature = "database")]
pub mod product_repository;
#[cfg(feature = "database")]
pub mod user_repository;

#[cfg(feature = "database")]
pub use postgres::*;

#[cfg(feature = "database")]
mod postgres {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info};

    use super::error::{DatabaseError, DatabaseErrorKind};
    use crate::config::DatabaseConfig;

    /// Database pool configuration
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 20,
                min_connections: 5,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    impl From<&DatabaseConfig> for PoolConfig {
        fn from(config: &DatabaseConfig) -> Self {
            Self {
                max_connections: config.max_connections,
                min_connections: config.min_connections,
                connection_timeout: Duration::from_secs(config.connection_timeout),
                idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
                ..Self::default()
            }
        }
    }

    pub async fn init_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, DatabaseError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connection_timeout = ?config.connection_timeout,
            "Initializing database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!(error = %e, "Failed to initialize database pool");
                DatabaseError::from_sqlx(e)
            })?;

        info!("Database pool initialized successfully");
        Ok(pool)
    }

    pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        init_pool(&config.url, PoolConfig::from(config)).await
    }

    /// Applies the SQL files under `migrations/`.
    pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
            log_error!(error = %e, "Database migration failed");
            DatabaseError::new(DatabaseErrorKind::Query {
                message: e.to_string(),
            })
        })?;
        info!("Database migrations applied");
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_pool_config_from_app_config() {
            let db = DatabaseConfig {
                url: "postgres://localhost/plushify".to_string(),
                max_connections: 8,
                min_connections: 2,
                connection_timeout: 5,
                idle_timeout: None,
                run_migrations: false,
            };
            let pool = PoolConfig::from(&db);

            assert_eq!(pool.max_connections, 8);
            assert_eq!(pool.connection_timeout, Duration::from_secs(5));
            assert_eq!(pool.idle_timeout, Duration::from_secs(600));
            assert_eq!(pool.max_lifetime, Duration::from_secs(1800));
        }
    }
}
