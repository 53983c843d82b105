use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Missing webhook header: {header}")]
    MissingHeader { header: String },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Webhook timestamp outside tolerance: skew={skew_secs}s")]
    TimestampOutOfTolerance { skew_secs: i64 },

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment configuration error: {message}")]
    ConfigurationError { message: String },
}
