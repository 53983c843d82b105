//! Polar webhook payloads and their translation into fulfillment events.
//!
//! Polar sends snake_case JSON; camelCase keys are accepted as aliases. The
//! platform user id travels in `data.customer.external_id`; Polar's own
//! customer id is never used for identity.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{FulfillmentEvent, WebhookEventType};

/// Outer envelope shared by every Polar event type.
#[derive(Debug, Clone, Deserialize)]
pub struct PolarWebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PolarWebhookEnvelope {
    pub fn kind(&self) -> WebhookEventType {
        WebhookEventType::parse(&self.event_type)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolarCustomer {
    #[serde(default, alias = "externalId")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolarOrder {
    pub id: String,
    #[serde(default, alias = "checkoutId")]
    pub checkout_id: Option<String>,
    #[serde(alias = "productId")]
    pub product_id: String,
    #[serde(alias = "totalAmount")]
    pub total_amount: i64,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub customer: Option<PolarCustomer>,
}

impl PolarOrder {
    /// The platform user id carried by the customer, if any.
    pub fn external_reference(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|c| c.external_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.customer.as_ref().and_then(|c| c.email.as_deref())
    }
}

pub fn parse_envelope(body: &[u8]) -> PaymentResult<PolarWebhookEnvelope> {
    serde_json::from_slice(body).map_err(|e| PaymentError::MalformedPayload {
        message: format!("invalid webhook JSON: {}", e),
    })
}

pub fn parse_order(envelope: &PolarWebhookEnvelope) -> PaymentResult<PolarOrder> {
    let order: PolarOrder = serde_json::from_value(envelope.data.clone()).map_err(|e| {
        PaymentError::MalformedPayload {
            message: format!("invalid order payload: {}", e),
        }
    })?;

    if order.id.trim().is_empty() {
        return Err(PaymentError::ValidationError {
            message: "order id is empty".to_string(),
            field: Some("data.id".to_string()),
        });
    }
    if order.product_id.trim().is_empty() {
        return Err(PaymentError::ValidationError {
            message: "product id is empty".to_string(),
            field: Some("data.product_id".to_string()),
        });
    }

    Ok(order)
}

/// Builds the normalized event for a resolved user. Pure; enqueueing is the caller's job.
pub fn to_fulfillment_event(order: &PolarOrder, internal_user_id: &str) -> FulfillmentEvent {
    FulfillmentEvent {
        external_order_id: order.id.clone(),
        external_checkout_id: order.checkout_id.clone(),
        internal_user_id: internal_user_id.to_string(),
        external_product_id: order.product_id.clone(),
        amount_paid_minor_units: order.total_amount,
        occurred_at: order.created_at,
    }
}
