//! Services module for business logic

pub mod catalog;
pub mod fulfillment;
pub mod identity;
pub mod notification;
pub mod reconciliation;
pub mod webhook_processor;

pub use catalog::{CatalogError, PricingEntry, ProductCatalog};
pub use fulfillment::{FulfillmentError, FulfillmentOutcome, FulfillmentProcessor};
pub use webhook_processor::{IngestOutcome, WebhookProcessor, WebhookProcessorError};
