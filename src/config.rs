//! Application configuration module
//! Loads settings from the environment once at startup and validates them before
//! any component is constructed.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub webhook: WebhookConfig,
    pub queue: QueueConfig,
    pub auth: AuthConfig,
    /// Run against in-memory stores without Postgres or Redis.
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Inbound webhook verification settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    /// Maximum allowed skew between `webhook-timestamp` and now, in seconds.
    pub tolerance_secs: u64,
}

/// Fulfillment queue, retry and reconciliation settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub visibility_timeout_secs: u64,
    pub max_attempts: u32,
    pub max_integrity_attempts: u32,
    /// Multiplier applied to the backoff schedule, in milliseconds per step second.
    pub backoff_unit_ms: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: i64,
}

/// Session authentication settings used by the admin surface
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub session_cookie: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_or("SKIP_EXTERNALS", false)?;

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(skip_externals)?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            queue: QueueConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.skip_externals {
            self.database.validate()?;
            self.cache.validate()?;
        }
        self.logging.validate()?;
        self.webhook.validate()?;
        self.queue.validate()?;
        self.auth.validate()?;

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env_or("SERVER_PORT", defaults.port)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: Some(600),
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    /// `DATABASE_URL` is only required when external services are in use.
    pub fn from_env(skip_externals: bool) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if skip_externals => String::new(),
            Err(_) => return Err(ConfigError::MissingVariable("DATABASE_URL".to_string())),
        };

        Ok(DatabaseConfig {
            url,
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", defaults.min_connections)?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", defaults.connection_timeout)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok())
                .or(defaults.idle_timeout),
            run_migrations: env_or("RUN_MIGRATIONS", defaults.run_migrations)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::InvalidValue(
                "DATABASE_URL must be a postgres:// URL".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            default_ttl: 300,
            max_connections: 10,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            default_ttl: env_or("CACHE_DEFAULT_TTL", defaults.default_ttl)?,
            max_connections: env_or("CACHE_MAX_CONNECTIONS", defaults.max_connections)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            tolerance_secs: 300,
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WebhookConfig {
            secret: env::var("POLAR_WEBHOOK_SECRET")
                .map_err(|_| ConfigError::MissingVariable("POLAR_WEBHOOK_SECRET".to_string()))?,
            tolerance_secs: env_or("WEBHOOK_TOLERANCE_SECS", Self::default().tolerance_secs)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue("POLAR_WEBHOOK_SECRET".to_string()));
        }

        if self.tolerance_secs == 0 {
            return Err(ConfigError::InvalidValue("WEBHOOK_TOLERANCE_SECS".to_string()));
        }

        Ok(())
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.tolerance_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1000,
            batch_size: 10,
            visibility_timeout_secs: 60,
            max_attempts: 5,
            max_integrity_attempts: 3,
            backoff_unit_ms: 1000,
            reconcile_interval_secs: 60,
            reconcile_batch_size: 100,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(QueueConfig {
            workers: env_or("FULFILLMENT_WORKERS", d.workers)?,
            poll_interval_ms: env_or("QUEUE_POLL_INTERVAL_MS", d.poll_interval_ms)?,
            batch_size: env_or("QUEUE_BATCH_SIZE", d.batch_size)?,
            visibility_timeout_secs: env_or("QUEUE_VISIBILITY_TIMEOUT_SECS", d.visibility_timeout_secs)?,
            max_attempts: env_or("QUEUE_MAX_ATTEMPTS", d.max_attempts)?,
            max_integrity_attempts: env_or("QUEUE_MAX_INTEGRITY_ATTEMPTS", d.max_integrity_attempts)?,
            backoff_unit_ms: env_or("QUEUE_BACKOFF_UNIT_MS", d.backoff_unit_ms)?,
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", d.reconcile_interval_secs)?,
            reconcile_batch_size: env_or("RECONCILE_BATCH_SIZE", d.reconcile_batch_size)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue("FULFILLMENT_WORKERS".to_string()));
        }

        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue("QUEUE_BATCH_SIZE".to_string()));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("QUEUE_MAX_ATTEMPTS".to_string()));
        }

        if self.max_integrity_attempts == 0 || self.max_integrity_attempts > self.max_attempts {
            return Err(ConfigError::ValidationFailed(
                "QUEUE_MAX_INTEGRITY_ATTEMPTS must be between 1 and QUEUE_MAX_ATTEMPTS".to_string(),
            ));
        }

        if self.visibility_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "QUEUE_VISIBILITY_TIMEOUT_SECS".to_string(),
            ));
        }

        if self.reconcile_batch_size <= 0 {
            return Err(ConfigError::InvalidValue("RECONCILE_BATCH_SIZE".to_string()));
        }

        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            session_cookie: "plushify.session_token".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            secret: env::var("BETTER_AUTH_SECRET")
                .map_err(|_| ConfigError::MissingVariable("BETTER_AUTH_SECRET".to_string()))?,
            session_cookie: env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| Self::default().session_cookie),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.len() < 32 {
            return Err(ConfigError::ValidationFailed(
                "BETTER_AUTH_SECRET must be at least 32 characters".to_string(),
            ));
        }

        if self.session_cookie.is_empty() {
            return Err(ConfigError::InvalidValue("SESSION_COOKIE_NAME".to_string()));
        }

        Ok(())
    }
}

/// Reads `key` and parses it, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
