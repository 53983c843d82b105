pub mod error;
pub mod polar;
pub mod signature;
pub mod types;

pub use error::{PaymentError, PaymentResult};
pub use signature::{WebhookHeaders, WebhookVerifier};
pub use types::FulfillmentEvent;
