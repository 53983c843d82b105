//! Durable at-least-once delivery between webhook ingestion and fulfillment.
//!
//! Messages move `pending -> processing -> completed`, or to `dead` once the
//! retry policy gives up. A claimed message that is neither acknowledged nor
//! rescheduled before its visibility timeout becomes claimable again, so a
//! consumer crash leads to redelivery rather than loss.

pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::payments::types::FulfillmentEvent;

pub use retry::{FailureClass, RetryDecision, RetryPolicy};

/// Event name for a paid order.
pub const ORDER_PAID: &str = "order.paid";

/// Wire shape of a queued message; `data.orderId` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub name: String,
    pub data: OrderPaidData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaidData {
    pub order_id: String,
    pub checkout_id: Option<String>,
    pub user_id: String,
    pub product_id: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&FulfillmentEvent> for QueueMessage {
    fn from(event: &FulfillmentEvent) -> Self {
        QueueMessage {
            name: ORDER_PAID.to_string(),
            data: OrderPaidData {
                order_id: event.external_order_id.clone(),
                checkout_id: event.external_checkout_id.clone(),
                user_id: event.internal_user_id.clone(),
                product_id: event.external_product_id.clone(),
                amount: event.amount_paid_minor_units,
                created_at: event.occurred_at,
            },
        }
    }
}

impl TryFrom<QueueMessage> for FulfillmentEvent {
    type Error = QueueError;

    fn try_from(message: QueueMessage) -> Result<Self, Self::Error> {
        if message.name != ORDER_PAID {
            return Err(QueueError::Decode(format!(
                "unexpected event name '{}'",
                message.name
            )));
        }
        let data = message.data;
        Ok(FulfillmentEvent {
            external_order_id: data.order_id,
            external_checkout_id: data.checkout_id,
            internal_user_id: data.user_id,
            external_product_id: data.product_id,
            amount_paid_minor_units: data.amount,
            occurred_at: data.created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Completed => "completed",
            DeliveryStatus::Dead => "dead",
        }
    }
}

/// A claimed message. `attempts` counts this delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn decode(&self) -> Result<FulfillmentEvent, QueueError> {
        let message: QueueMessage = serde_json::from_value(self.payload.clone())
            .map_err(|e| QueueError::Decode(e.to_string()))?;
        FulfillmentEvent::try_from(message)
    }
}

/// A message parked for operator attention.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: i64,
    pub processing: i64,
    pub dead: i64,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("could not encode message: {0}")]
    Encode(String),

    #[error("could not decode message: {0}")]
    Decode(String),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Storage(e) => e.is_retryable(),
            QueueError::Encode(_) | QueueError::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Durably stores the message; returns its delivery id.
    async fn enqueue(&self, message: &QueueMessage) -> Result<Uuid, QueueError>;

    /// Claims up to `limit` due messages, hiding them from other consumers
    /// for `visibility`. Each claim increments the attempt counter.
    async fn claim(&self, limit: i64, visibility: Duration) -> Result<Vec<Delivery>, QueueError>;

    // Settling only touches a row that is still `processing` at the
    // caller's `attempt`. They return `false` when another consumer has
    // reclaimed or settled the message since.

    async fn ack(&self, id: Uuid, attempt: u32) -> Result<bool, QueueError>;

    /// Makes the message claimable again after `delay`.
    async fn retry_later(
        &self,
        id: Uuid,
        attempt: u32,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError>;

    async fn dead_letter(&self, id: Uuid, attempt: u32, error: &str) -> Result<bool, QueueError>;

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError>;

    /// Moves a dead message back to `pending` with a fresh attempt budget.
    /// Returns `false` if no dead message has this id.
    async fn requeue(&self, id: Uuid) -> Result<bool, QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;
}

/// Serializes a message for storage.
pub fn encode(message: &QueueMessage) -> Result<serde_json::Value, QueueError> {
    serde_json::to_value(message).map_err(|e| QueueError::Encode(e.to_string()))
}
