use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use thiserror::Error;

/// Storage-layer error shared by the Postgres and in-memory stores.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("query error: {message}")]
    Query { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        })
    }

    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::UniqueViolation {
            constraint: constraint.into(),
        })
    }

    /// Connection loss, pool exhaustion and serialization conflicts clear up on
    /// their own; constraint violations and missing rows do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::PoolExhausted { .. }
        )
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted {
                message: err.to_string(),
            },
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or_default().to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseErrorKind::UniqueViolation { constraint },
                    Some("23503") => DatabaseErrorKind::ForeignKeyViolation { constraint },
                    // serialization_failure, deadlock_detected
                    Some("40001") | Some("40P01") => DatabaseErrorKind::Connection {
                        message: db_err.message().to_string(),
                    },
                    _ => DatabaseErrorKind::Query {
                        message: db_err.message().to_string(),
                    },
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };

        Self { kind }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "product" => {
                AppErrorKind::Domain(DomainError::ProductNotFound {
                    product_id: id.clone(),
                })
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "user" => {
                AppErrorKind::Domain(DomainError::UserNotFound { user_id: id.clone() })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let pool = DatabaseError::new(DatabaseErrorKind::PoolExhausted {
            message: "timed out".to_string(),
        });
        let unique = DatabaseError::unique_violation("credit_ledger_external_order_id_key");

        assert!(pool.is_retryable());
        assert!(!unique.is_retryable());
    }

    #[test]
    fn test_not_found_maps_to_domain_error() {
        let app: AppError = DatabaseError::not_found("product", "abc").into();
        assert_eq!(app.status_code(), 404);

        let app: AppError = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "reset".to_string(),
        })
        .into();
        assert_eq!(app.status_code(), 503);
    }
}
