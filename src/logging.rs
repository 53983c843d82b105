//! Tracing setup and log-safety helpers

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global subscriber from `LOG_LEVEL` / `LOG_FORMAT`.
/// `RUST_LOG`, when set, takes precedence over `LOG_LEVEL`.
pub fn init_tracing() {
    let config = LoggingConfig::from_env().unwrap_or_default();
    init_tracing_with(&config);
}

pub fn init_tracing_with(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},sqlx=warn,tower_http=info",
            config.level.to_lowercase()
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    // try_init so tests and repeated calls do not panic
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    if result.is_ok() {
        tracing::debug!(format = ?config.format, level = %config.level, "Tracing initialized");
    }
}

/// Masks the local part of an e-mail address for logging: `jane@x.io` -> `j***@x.io`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}
