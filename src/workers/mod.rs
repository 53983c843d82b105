pub mod fulfillment_worker;
pub mod reconciliation_sweep;

pub use fulfillment_worker::{spawn_pool, FulfillmentWorker, FulfillmentWorkerConfig};
pub use reconciliation_sweep::ReconciliationSweepWorker;
