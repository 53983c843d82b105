use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A successful payment, normalized from the provider's webhook.
///
/// Produced once per paid order, possibly delivered many times, applied at
/// most once: `external_order_id` is the idempotency key all the way down to
/// the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentEvent {
    pub external_order_id: String,
    pub external_checkout_id: Option<String>,
    pub internal_user_id: String,
    pub external_product_id: String,
    pub amount_paid_minor_units: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Provider webhook event types this service distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    OrderPaid,
    Other(String),
}

impl WebhookEventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "order.paid" => WebhookEventType::OrderPaid,
            other => WebhookEventType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventType::OrderPaid => "order.paid",
            WebhookEventType::Other(raw) => raw,
        }
    }
}
