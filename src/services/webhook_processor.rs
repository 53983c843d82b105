use http::HeaderMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, AuthError, InfrastructureError, IntegrityError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::polar::{self, PolarOrder};
use crate::payments::signature::{WebhookHeaders, WebhookVerifier};
use crate::payments::types::WebhookEventType;
use crate::queue::{EventQueue, QueueMessage};
use crate::services::identity::{IdentityError, IdentityResolver};
use crate::services::notification::{AlertKind, OperatorAlerts};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Missing signature header: {0}")]
    MissingSignature(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Order {order_id} has no customer external reference")]
    MissingExternalReference { order_id: String },
    #[error("Order {order_id} references unknown user {user_id}")]
    UnknownUser { order_id: String, user_id: String },
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Enqueue failed: {0}")]
    EnqueueError(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<PaymentError> for WebhookProcessorError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::MissingHeader { header } => WebhookProcessorError::MissingSignature(header),
            PaymentError::WebhookVerificationError { .. }
            | PaymentError::TimestampOutOfTolerance { .. } => {
                WebhookProcessorError::InvalidSignature(err.to_string())
            }
            PaymentError::MalformedPayload { .. } | PaymentError::ValidationError { .. } => {
                WebhookProcessorError::MalformedPayload(err.to_string())
            }
            PaymentError::ConfigurationError { message } => {
                WebhookProcessorError::Configuration(message)
            }
        }
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        let kind = match err {
            WebhookProcessorError::MissingSignature(_) => {
                AppErrorKind::Authentication(AuthError::MissingSignature)
            }
            WebhookProcessorError::InvalidSignature(reason) => {
                AppErrorKind::Authentication(AuthError::InvalidSignature { reason })
            }
            WebhookProcessorError::MalformedPayload(reason) => {
                AppErrorKind::Validation(ValidationError::MalformedPayload { reason })
            }
            WebhookProcessorError::MissingExternalReference { order_id } => {
                AppErrorKind::Integrity(IntegrityError::MissingExternalReference { order_id })
            }
            WebhookProcessorError::UnknownUser { user_id, .. } => {
                AppErrorKind::Integrity(IntegrityError::UnknownUser { user_id })
            }
            WebhookProcessorError::DatabaseError(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
            WebhookProcessorError::EnqueueError(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Queue { message })
            }
            WebhookProcessorError::Configuration(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
        };
        AppError::new(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A fulfillment event was durably queued.
    Enqueued { message_id: Uuid, order_id: String },
    /// The event type is not one this service acts on.
    Ignored { event_type: String },
}

/// Verifies, translates and enqueues provider webhooks. Never touches balances.
pub struct WebhookProcessor {
    verifier: WebhookVerifier,
    identity: IdentityResolver,
    queue: Arc<dyn EventQueue>,
    alerts: Arc<OperatorAlerts>,
}

impl WebhookProcessor {
    pub fn new(
        verifier: WebhookVerifier,
        identity: IdentityResolver,
        queue: Arc<dyn EventQueue>,
        alerts: Arc<OperatorAlerts>,
    ) -> Self {
        Self {
            verifier,
            identity,
            queue,
            alerts,
        }
    }

    pub async fn process_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<IngestOutcome, WebhookProcessorError> {
        // Authenticity first: nothing below runs for an unsigned request.
        let signature_headers = WebhookHeaders::from_header_map(headers).map_err(|e| {
            warn!(error = %e, "Webhook rejected: signature headers missing");
            WebhookProcessorError::from(e)
        })?;
        self.verifier.verify(&signature_headers, body).map_err(|e| {
            warn!(webhook_id = %signature_headers.id, error = %e, "Webhook rejected: invalid signature");
            WebhookProcessorError::from(e)
        })?;

        let envelope = polar::parse_envelope(body)?;
        let payload_digest = hex::encode(Sha256::digest(body));

        if let WebhookEventType::Other(event_type) = envelope.kind() {
            info!(
                webhook_id = %signature_headers.id,
                event_type = %event_type,
                "Ignoring webhook event type"
            );
            return Ok(IngestOutcome::Ignored { event_type });
        }

        let order = polar::parse_order(&envelope)?;
        info!(
            webhook_id = %signature_headers.id,
            order_id = %order.id,
            product_id = %order.product_id,
            payload_sha256 = %payload_digest,
            "Received paid order"
        );

        let user = match self.identity.resolve(order.external_reference()).await {
            Ok(user) => user,
            Err(e) => return Err(self.identity_failure(&order, &payload_digest, e)),
        };

        let event = polar::to_fulfillment_event(&order, &user.id);
        let message_id = self
            .queue
            .enqueue(&QueueMessage::from(&event))
            .await
            .map_err(|e| {
                error!(order_id = %event.external_order_id, error = %e, "Failed to enqueue fulfillment event");
                WebhookProcessorError::EnqueueError(e.to_string())
            })?;

        info!(
            order_id = %event.external_order_id,
            user_id = %event.internal_user_id,
            message_id = %message_id,
            "Fulfillment event enqueued"
        );

        Ok(IngestOutcome::Enqueued {
            message_id,
            order_id: event.external_order_id,
        })
    }

    fn identity_failure(
        &self,
        order: &PolarOrder,
        payload_digest: &str,
        err: IdentityError,
    ) -> WebhookProcessorError {
        let context = json!({
            "order_id": order.id,
            "checkout_id": order.checkout_id,
            "product_id": order.product_id,
            "total_amount": order.total_amount,
            "customer_external_id": order.external_reference(),
            "customer_email": order.customer_email().map(crate::logging::mask_email),
            "payload_sha256": payload_digest,
        });

        match err {
            IdentityError::MissingExternalReference => {
                self.alerts.raise(
                    AlertKind::MissingExternalReference,
                    Some(&order.id),
                    "Paid order has no customer external reference",
                    context,
                );
                WebhookProcessorError::MissingExternalReference {
                    order_id: order.id.clone(),
                }
            }
            IdentityError::UnknownUser { user_id } => {
                self.alerts.raise(
                    AlertKind::UnknownUser,
                    Some(&order.id),
                    "Paid order references a user that does not exist",
                    context,
                );
                WebhookProcessorError::UnknownUser {
                    order_id: order.id.clone(),
                    user_id,
                }
            }
            IdentityError::Storage(e) => {
                warn!(order_id = %order.id, error = %e, "User lookup failed; provider will retry");
                WebhookProcessorError::DatabaseError(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{MemoryEventQueue, MemoryStore};
    use crate::database::models::PlatformRole;
    use crate::payments::signature::{HEADER_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
    use chrono::Utc;
    use std::time::Duration;

    const SECRET: &str = "polar_whs_test_secret";

    struct Harness {
        processor: WebhookProcessor,
        queue: Arc<MemoryEventQueue>,
        alerts: Arc<OperatorAlerts>,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        store.insert_user("u1", "u1@example.com", 5, PlatformRole::User).await;
        let queue = Arc::new(MemoryEventQueue::new());
        let alerts = Arc::new(OperatorAlerts::new());
        let processor = WebhookProcessor::new(
            WebhookVerifier::new(SECRET, Duration::from_secs(300)).unwrap(),
            IdentityResolver::new(Arc::new(store)),
            queue.clone(),
            alerts.clone(),
        );
        Harness {
            processor,
            queue,
            alerts,
        }
    }

    fn signed(body: &[u8]) -> HeaderMap {
        let verifier = WebhookVerifier::new(SECRET, Duration::from_secs(300)).unwrap();
        let ts = Utc::now().timestamp();
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_ID, "msg_1".parse().unwrap());
        headers.insert(HEADER_TIMESTAMP, ts.to_string().parse().unwrap());
        headers.insert(
            HEADER_SIGNATURE,
            verifier.sign("msg_1", ts, body).unwrap().parse().unwrap(),
        );
        headers
    }

    fn order_paid(external_id: Option<&str>) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "order.paid",
            "data": {
                "id": "ord_1",
                "checkout_id": "chk_1",
                "product_id": "prod_basic",
                "total_amount": 900,
                "created_at": "2025-03-01T12:00:00Z",
                "customer": { "external_id": external_id, "email": "u1@example.com" }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn enqueues_paid_order() {
        let h = harness().await;
        let body = order_paid(Some("u1"));

        let outcome = h.processor.process_webhook(&signed(&body), &body).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Enqueued { ref order_id, .. } if order_id == "ord_1"));
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test]
    async fn ignores_other_event_types() {
        let h = harness().await;
        let body = serde_json::to_vec(&json!({ "type": "checkout.updated", "data": {} })).unwrap();

        let outcome = h.processor.process_webhook(&signed(&body), &body).await.unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Ignored {
                event_type: "checkout.updated".to_string()
            }
        );
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn rejects_unsigned_request_before_parsing() {
        let h = harness().await;
        let result = h.processor.process_webhook(&HeaderMap::new(), b"not even json").await;

        assert!(matches!(result, Err(WebhookProcessorError::MissingSignature(_))));
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn rejects_signature_for_other_body() {
        let h = harness().await;
        let body = order_paid(Some("u1"));
        let headers = signed(b"{}");

        let result = h.processor.process_webhook(&headers, &body).await;

        assert!(matches!(result, Err(WebhookProcessorError::InvalidSignature(_))));
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn missing_external_reference_raises_alert() {
        let h = harness().await;
        let body = order_paid(None);

        let result = h.processor.process_webhook(&signed(&body), &body).await;

        assert!(matches!(
            result,
            Err(WebhookProcessorError::MissingExternalReference { .. })
        ));
        assert_eq!(h.alerts.count(AlertKind::MissingExternalReference), 1);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_user_raises_alert() {
        let h = harness().await;
        let body = order_paid(Some("ghost"));

        let result = h.processor.process_webhook(&signed(&body), &body).await;

        assert!(matches!(result, Err(WebhookProcessorError::UnknownUser { .. })));
        assert_eq!(h.alerts.count(AlertKind::UnknownUser), 1);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_body_with_valid_signature_is_rejected() {
        let h = harness().await;
        let body = b"{\"type\": 42}".to_vec();

        let result = h.processor.process_webhook(&signed(&body), &body).await;

        assert!(matches!(result, Err(WebhookProcessorError::MalformedPayload(_))));
    }
}
