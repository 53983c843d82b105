//! Unified error handling for the Plushify backend
//!
//! Every layer keeps its own `thiserror` enum; at the HTTP boundary they are
//! folded into [`AppError`], which carries the status code, a machine-readable
//! error code and a message safe to show to clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain errors (4xx)
    ProductNotFound,
    UserNotFound,
    DuplicateProduct,

    // Authentication errors (401, 403)
    MissingSignature,
    InvalidSignature,
    Unauthorized,
    Forbidden,

    // Integrity errors (422)
    UnknownUser,
    UnknownProduct,
    MissingExternalReference,

    // Infrastructure errors (5xx)
    DatabaseError,
    CacheError,
    QueueError,
    ConfigurationError,

    // Generic
    InternalError,
    ValidationError,
}

/// Business-level errors on catalog and user lookups
#[derive(Debug, Clone)]
pub enum DomainError {
    ProductNotFound { product_id: String },
    UserNotFound { user_id: String },
    DuplicateProduct { field: String, value: String },
}

/// Authentication and authorization failures
#[derive(Debug, Clone)]
pub enum AuthError {
    MissingSignature,
    InvalidSignature { reason: String },
    Unauthorized,
    Forbidden,
}

/// Payment data that cannot be reconciled with platform records. These are
/// configuration problems that need an operator, not a client retry.
#[derive(Debug, Clone)]
pub enum IntegrityError {
    UnknownUser { user_id: String },
    UnknownProduct { product_id: String },
    MissingExternalReference { order_id: String },
}

/// Infrastructure-level errors (database, cache, queue, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Queue { message: String },
    Configuration { message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidFormat { field: String, reason: String },
    MalformedPayload { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Authentication(AuthError),
    Integrity(IntegrityError),
    Infrastructure(InfrastructureError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ProductNotFound { .. } => 404,
                DomainError::UserNotFound { .. } => 404,
                DomainError::DuplicateProduct { .. } => 409,
            },
            AppErrorKind::Authentication(err) => match err {
                AuthError::MissingSignature
                | AuthError::InvalidSignature { .. }
                | AuthError::Unauthorized => 401,
                AuthError::Forbidden => 403,
            },
            AppErrorKind::Integrity(_) => 422,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } if *is_retryable => 503,
                InfrastructureError::Queue { .. } => 503,
                _ => 500,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ProductNotFound { .. } => ErrorCode::ProductNotFound,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::DuplicateProduct { .. } => ErrorCode::DuplicateProduct,
            },
            AppErrorKind::Authentication(err) => match err {
                AuthError::MissingSignature => ErrorCode::MissingSignature,
                AuthError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                AuthError::Unauthorized => ErrorCode::Unauthorized,
                AuthError::Forbidden => ErrorCode::Forbidden,
            },
            AppErrorKind::Integrity(err) => match err {
                IntegrityError::UnknownUser { .. } => ErrorCode::UnknownUser,
                IntegrityError::UnknownProduct { .. } => ErrorCode::UnknownProduct,
                IntegrityError::MissingExternalReference { .. } => {
                    ErrorCode::MissingExternalReference
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Queue { .. } => ErrorCode::QueueError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ProductNotFound { .. } => "Product not found".to_string(),
                DomainError::UserNotFound { user_id } => format!("User '{}' not found", user_id),
                DomainError::DuplicateProduct { field, value } => {
                    format!("A product with {} '{}' already exists", field, value)
                }
            },
            AppErrorKind::Authentication(err) => match err {
                AuthError::MissingSignature => "Missing webhook signature".to_string(),
                AuthError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
                AuthError::Unauthorized => "Unauthorized".to_string(),
                AuthError::Forbidden => "Admin access required".to_string(),
            },
            AppErrorKind::Integrity(err) => match err {
                IntegrityError::UnknownUser { user_id } => {
                    format!("No user matches external reference '{}'", user_id)
                }
                IntegrityError::UnknownProduct { product_id } => {
                    format!("No product matches '{}'", product_id)
                }
                IntegrityError::MissingExternalReference { order_id } => {
                    format!("Order '{}' carries no customer external reference", order_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidFormat { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
                ValidationError::MalformedPayload { reason } => {
                    format!("Malformed payload: {}", reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } | InfrastructureError::Queue { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs next to the source type.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_not_found_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::ProductNotFound {
            product_id: "7b0c".to_string(),
        }));

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::ProductNotFound);
        assert_eq!(error.user_message(), "Product not found");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_authentication_errors() {
        let missing = AppError::new(AppErrorKind::Authentication(AuthError::MissingSignature));
        let forbidden = AppError::new(AppErrorKind::Authentication(AuthError::Forbidden));

        assert_eq!(missing.status_code(), 401);
        assert_eq!(forbidden.status_code(), 403);
        assert_eq!(forbidden.user_message(), "Admin access required");
    }

    #[test]
    fn test_integrity_error_is_unprocessable() {
        let error = AppError::new(AppErrorKind::Integrity(IntegrityError::UnknownUser {
            user_id: "u_missing".to_string(),
        }));

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::UnknownUser);
        assert!(error.user_message().contains("u_missing"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_transient_database_error_is_retryable() {
        let error = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "pool timed out".to_string(),
            is_retryable: true,
        }));

        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::MissingExternalReference).unwrap();
        assert_eq!(json, "\"MISSING_EXTERNAL_REFERENCE\"");
    }
}
