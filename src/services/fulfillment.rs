use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{ApplyOutcome, CreditGrant, Product};
use crate::database::repository::{CreditLedger, ProductStore};
use crate::payments::types::FulfillmentEvent;
use crate::queue::FailureClass;
use crate::services::notification::{AlertKind, OperatorAlerts};

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("order {order_id} references unknown product {product_id}")]
    UnknownProduct { order_id: String, product_id: String },

    #[error("order {order_id} references unknown user {user_id}")]
    UnknownUser { order_id: String, user_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl FulfillmentError {
    pub fn class(&self) -> FailureClass {
        match self {
            FulfillmentError::UnknownProduct { .. } | FulfillmentError::UnknownUser { .. } => {
                FailureClass::Integrity
            }
            FulfillmentError::Storage(_) => FailureClass::Transient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Applied {
        order_id: String,
        user_id: String,
        credits_granted: i32,
        balance: i64,
    },
    /// The order was already fulfilled by an earlier delivery.
    Duplicate { order_id: String },
}

/// Turns a fulfillment event into a ledger entry plus balance increment.
///
/// Safe to call any number of times for the same order: the ledger's unique
/// order id decides which delivery wins, and every other delivery is a no-op.
pub struct FulfillmentProcessor {
    products: Arc<dyn ProductStore>,
    ledger: Arc<dyn CreditLedger>,
    alerts: Arc<OperatorAlerts>,
}

impl FulfillmentProcessor {
    pub fn new(
        products: Arc<dyn ProductStore>,
        ledger: Arc<dyn CreditLedger>,
        alerts: Arc<OperatorAlerts>,
    ) -> Self {
        Self {
            products,
            ledger,
            alerts,
        }
    }

    pub async fn process(
        &self,
        event: &FulfillmentEvent,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        let order_id = event.external_order_id.clone();

        let product = match self
            .products
            .find_by_external_id(&event.external_product_id)
            .await?
        {
            Some(product) => product,
            None => return self.unknown_product(event).await,
        };

        self.check_product(event, &product);

        let grant = CreditGrant {
            user_id: event.internal_user_id.clone(),
            external_order_id: event.external_order_id.clone(),
            external_checkout_id: event.external_checkout_id.clone(),
            external_product_id: event.external_product_id.clone(),
            credits: product.credit_grant,
            amount_paid_minor_units: event.amount_paid_minor_units,
        };

        match self.ledger.apply_grant(&grant).await {
            Ok(ApplyOutcome::Applied { entry, balance }) => {
                info!(
                    order_id = %entry.external_order_id,
                    user_id = %entry.user_id,
                    credits = entry.credits_granted,
                    balance = balance,
                    "✅ Order fulfilled"
                );
                Ok(FulfillmentOutcome::Applied {
                    order_id,
                    user_id: entry.user_id,
                    credits_granted: entry.credits_granted,
                    balance,
                })
            }
            Ok(ApplyOutcome::AlreadyApplied { entry }) => {
                info!(
                    order_id = %entry.external_order_id,
                    applied_at = %entry.applied_at,
                    "Duplicate delivery, order already fulfilled"
                );
                Ok(FulfillmentOutcome::Duplicate { order_id })
            }
            Err(e) if is_missing_user(&e) => {
                self.alerts.raise(
                    AlertKind::UnknownUser,
                    Some(&event.external_order_id),
                    "Fulfillment event references a user that does not exist",
                    event_context(event),
                );
                Err(FulfillmentError::UnknownUser {
                    order_id,
                    user_id: event.internal_user_id.clone(),
                })
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, retryable = e.is_retryable(), "Ledger write failed");
                Err(FulfillmentError::Storage(e))
            }
        }
    }

    /// A product deleted after the order was fulfilled must not turn a
    /// redelivery into an integrity failure.
    async fn unknown_product(
        &self,
        event: &FulfillmentEvent,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        if self
            .ledger
            .find_by_order_id(&event.external_order_id)
            .await?
            .is_some()
        {
            info!(order_id = %event.external_order_id, "Duplicate delivery for a product no longer in the catalog");
            return Ok(FulfillmentOutcome::Duplicate {
                order_id: event.external_order_id.clone(),
            });
        }

        error!(
            order_id = %event.external_order_id,
            product_id = %event.external_product_id,
            "Paid order references a product missing from the catalog"
        );
        self.alerts.raise(
            AlertKind::UnknownProduct,
            Some(&event.external_order_id),
            "Paid order references a product missing from the catalog",
            event_context(event),
        );

        Err(FulfillmentError::UnknownProduct {
            order_id: event.external_order_id.clone(),
            product_id: event.external_product_id.clone(),
        })
    }

    fn check_product(&self, event: &FulfillmentEvent, product: &Product) {
        if !product.is_active {
            warn!(
                order_id = %event.external_order_id,
                product_slug = %product.slug,
                "Fulfilling order for an inactive product"
            );
        }
        if product.price_minor_units != event.amount_paid_minor_units {
            warn!(
                order_id = %event.external_order_id,
                product_slug = %product.slug,
                expected = product.price_minor_units,
                paid = event.amount_paid_minor_units,
                "Paid amount differs from catalog price"
            );
        }
    }
}

fn is_missing_user(err: &DatabaseError) -> bool {
    match &err.kind {
        DatabaseErrorKind::NotFound { entity, .. } => entity == "user",
        DatabaseErrorKind::ForeignKeyViolation { .. } => true,
        _ => false,
    }
}

fn event_context(event: &FulfillmentEvent) -> serde_json::Value {
    json!({
        "order_id": event.external_order_id,
        "checkout_id": event.external_checkout_id,
        "user_id": event.internal_user_id,
        "product_id": event.external_product_id,
        "amount": event.amount_paid_minor_units,
        "occurred_at": event.occurred_at,
    })
}
