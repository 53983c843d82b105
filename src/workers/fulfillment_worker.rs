use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::queue::{Delivery, EventQueue, QueueError, RetryDecision, RetryPolicy};
use crate::services::fulfillment::{FulfillmentOutcome, FulfillmentProcessor};
use crate::services::notification::{AlertKind, OperatorAlerts};

#[derive(Debug, Clone)]
pub struct FulfillmentWorkerConfig {
    /// How long an idle consumer sleeps before polling again.
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// A claimed message is redelivered if not settled within this window.
    pub visibility_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FulfillmentWorkerConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for FulfillmentWorkerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            retry: RetryPolicy::from(config),
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Retrying,
    DeadLettered,
    /// Settling failed; the visibility timeout will redeliver it.
    Unsettled,
}

/// One queue consumer. Several run side by side, each handling one event at
/// a time; the ledger's unique order id keeps them from double-crediting.
pub struct FulfillmentWorker {
    id: usize,
    queue: Arc<dyn EventQueue>,
    processor: Arc<FulfillmentProcessor>,
    alerts: Arc<OperatorAlerts>,
    config: FulfillmentWorkerConfig,
}

impl FulfillmentWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn EventQueue>,
        processor: Arc<FulfillmentProcessor>,
        alerts: Arc<OperatorAlerts>,
        config: FulfillmentWorkerConfig,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            alerts,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            worker = self.id,
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "fulfillment worker started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(handled) => handled == 0,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "failed to claim fulfillment events");
                    true
                }
            };

            // Drain without sleeping while there is work.
            if !idle {
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker = self.id, "fulfillment worker stopped");
    }

    /// Claims one batch and settles every delivery in it. Returns the number
    /// of deliveries handled.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let deliveries = self
            .queue
            .claim(self.config.batch_size, self.config.visibility_timeout)
            .await?;

        let handled = deliveries.len();
        for delivery in deliveries {
            self.handle_delivery(delivery).await;
        }
        Ok(handled)
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> Settlement {
        // Messages that keep crashing their consumer never get to fail normally.
        if self.config.retry.exhausted(delivery.attempts) {
            let reason = format!("exceeded {} delivery attempts", self.config.retry.max_attempts);
            return self.dead_letter(&delivery, None, &reason).await;
        }

        let event = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "undecodable fulfillment event");
                return self.dead_letter(&delivery, None, &e.to_string()).await;
            }
        };

        match self.processor.process(&event).await {
            Ok(outcome) => {
                if let FulfillmentOutcome::Duplicate { .. } = outcome {
                    debug!(delivery_id = %delivery.id, order_id = %event.external_order_id, "duplicate delivery acknowledged");
                }
                let result = self.queue.ack(delivery.id, delivery.attempts).await;
                self.settle(&delivery, result, Settlement::Acked)
            }
            Err(e) => match self.config.retry.decide(delivery.attempts, e.class()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        worker = self.id,
                        delivery_id = %delivery.id,
                        order_id = %event.external_order_id,
                        attempts = delivery.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "fulfillment failed, scheduling retry"
                    );
                    let result = self
                        .queue
                        .retry_later(delivery.id, delivery.attempts, delay, &e.to_string())
                        .await;
                    self.settle(&delivery, result, Settlement::Retrying)
                }
                RetryDecision::DeadLetter => {
                    self.dead_letter(&delivery, Some(&event.external_order_id), &e.to_string())
                        .await
                }
            },
        }
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        order_id: Option<&str>,
        reason: &str,
    ) -> Settlement {
        let result = self
            .queue
            .dead_letter(delivery.id, delivery.attempts, reason)
            .await;
        let settlement = self.settle(delivery, result, Settlement::DeadLettered);

        if settlement == Settlement::DeadLettered {
            let order_id = order_id
                .map(str::to_string)
                .or_else(|| delivery.payload["data"]["orderId"].as_str().map(str::to_string));
            self.alerts.raise(
                AlertKind::DeadLettered,
                order_id.as_deref(),
                "Fulfillment event moved to the dead-letter queue",
                json!({
                    "delivery_id": delivery.id,
                    "attempts": delivery.attempts,
                    "error": reason,
                    "payload": delivery.payload,
                }),
            );
        }
        settlement
    }

    fn settle(
        &self,
        delivery: &Delivery,
        result: Result<bool, QueueError>,
        settlement: Settlement,
    ) -> Settlement {
        match result {
            Ok(true) => settlement,
            Ok(false) => {
                warn!(
                    worker = self.id,
                    delivery_id = %delivery.id,
                    attempts = delivery.attempts,
                    "delivery was reclaimed by another consumer; leaving it"
                );
                Settlement::Unsettled
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    delivery_id = %delivery.id,
                    error = %e,
                    "failed to settle delivery; it will be redelivered"
                );
                Settlement::Unsettled
            }
        }
    }
}

/// Spawns `count` consumers sharing one queue and processor.
pub fn spawn_pool(
    count: usize,
    queue: Arc<dyn EventQueue>,
    processor: Arc<FulfillmentProcessor>,
    alerts: Arc<OperatorAlerts>,
    config: FulfillmentWorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|id| {
            let worker = FulfillmentWorker::new(
                id,
                queue.clone(),
                processor.clone(),
                alerts.clone(),
                config.clone(),
            );
            tokio::spawn(worker.run(shutdown_rx.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{MemoryEventQueue, MemoryStore};
    use crate::database::error::{DatabaseError, DatabaseErrorKind};
    use crate::database::models::{ApplyOutcome, CreditGrant, LedgerEntry, NewProduct, PlatformRole};
    use crate::database::repository::{CreditLedger, ProductStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;
    use crate::payments::types::FulfillmentEvent;
    use crate::queue::{DeliveryStatus, QueueMessage};
    use chrono::Utc;

    struct Harness {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryEventQueue>,
        alerts: Arc<OperatorAlerts>,
        worker: FulfillmentWorker,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_user("u1", "u1@example.com", 5, PlatformRole::User).await;
        store
            .insert(&NewProduct {
                external_product_id: "prod_basic".to_string(),
                slug: "basic".to_string(),
                name: "Basic".to_string(),
                credit_grant: 30,
                price_minor_units: 900,
                display_order: 1,
                is_active: true,
            })
            .await
            .unwrap();

        let queue = Arc::new(MemoryEventQueue::new());
        let alerts = Arc::new(OperatorAlerts::new());
        let processor = Arc::new(FulfillmentProcessor::new(
            store.clone(),
            store.clone(),
            alerts.clone(),
        ));
        let config = FulfillmentWorkerConfig::from(&QueueConfig {
            backoff_unit_ms: 0,
            ..QueueConfig::default()
        });
        let worker = FulfillmentWorker::new(0, queue.clone(), processor, alerts.clone(), config);

        Harness {
            store,
            queue,
            alerts,
            worker,
        }
    }

    /// Ledger whose first `failures` grants fail with a connection error.
    struct FlakyLedger {
        inner: Arc<MemoryStore>,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyLedger {
        fn new(inner: Arc<MemoryStore>, failures: u32) -> Self {
            Self {
                inner,
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CreditLedger for FlakyLedger {
        async fn apply_grant(&self, grant: &CreditGrant) -> Result<ApplyOutcome, DatabaseError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(DatabaseError::new(DatabaseErrorKind::Connection {
                    message: "connection reset by peer".to_string(),
                }));
            }
            self.inner.apply_grant(grant).await
        }

        async fn find_by_order_id(
            &self,
            external_order_id: &str,
        ) -> Result<Option<LedgerEntry>, DatabaseError> {
            self.inner.find_by_order_id(external_order_id).await
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
            self.inner.list_for_user(user_id).await
        }

        async fn find_unreconciled(&self, limit: i64) -> Result<Vec<LedgerEntry>, DatabaseError> {
            self.inner.find_unreconciled(limit).await
        }

        async fn reconcile_entry(&self, entry_id: Uuid) -> Result<Option<i64>, DatabaseError> {
            self.inner.reconcile_entry(entry_id).await
        }
    }

    fn message(order_id: &str, product_id: &str) -> QueueMessage {
        QueueMessage::from(&FulfillmentEvent {
            external_order_id: order_id.to_string(),
            external_checkout_id: None,
            internal_user_id: "u1".to_string(),
            external_product_id: product_id.to_string(),
            amount_paid_minor_units: 900,
            occurred_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn acks_processed_events() {
        let h = harness().await;
        let id = h.queue.enqueue(&message("ord_1", "prod_basic")).await.unwrap();

        assert_eq!(h.worker.run_once().await.unwrap(), 1);
        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Completed));
        assert_eq!(h.store.balance("u1").await, Some(35));
    }

    #[tokio::test]
    async fn duplicate_messages_credit_once() {
        let h = harness().await;
        h.queue.enqueue(&message("ord_1", "prod_basic")).await.unwrap();
        h.queue.enqueue(&message("ord_1", "prod_basic")).await.unwrap();

        assert_eq!(h.worker.run_once().await.unwrap(), 2);
        assert_eq!(h.store.balance("u1").await, Some(35));
        assert_eq!(h.store.ledger_len().await, 1);
    }

    #[tokio::test]
    async fn unknown_product_is_retried_then_dead_lettered() {
        let h = harness().await;
        let id = h.queue.enqueue(&message("ord_2", "prod_unknown")).await.unwrap();

        for _ in 0..2 {
            h.worker.run_once().await.unwrap();
            assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Pending));
        }
        h.worker.run_once().await.unwrap();

        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Dead));
        assert_eq!(h.alerts.count(AlertKind::DeadLettered), 1);
        assert_eq!(h.store.balance("u1").await, Some(5));

        let dead = h.queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].last_error.as_deref().unwrap_or_default().contains("prod_unknown"));
    }

    #[tokio::test]
    async fn undecodable_payload_is_dead_lettered_immediately() {
        let h = harness().await;
        let mut bad = message("ord_3", "prod_basic");
        bad.name = "order.refunded".to_string();
        let id = h.queue.enqueue(&bad).await.unwrap();

        h.worker.run_once().await.unwrap();

        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Dead));
        assert_eq!(h.alerts.count(AlertKind::DeadLettered), 1);
    }

    #[tokio::test]
    async fn exhausted_delivery_is_dead_lettered_without_processing() {
        let h = harness().await;
        let id = h.queue.enqueue(&message("ord_4", "prod_basic")).await.unwrap();

        // consumers that crash mid-delivery leave the lock to lapse each time
        let mut delivery = None;
        for _ in 0..6 {
            delivery = h.queue.claim(1, Duration::ZERO).await.unwrap().pop();
        }
        let delivery = delivery.unwrap();
        assert_eq!(delivery.attempts, 6);

        assert_eq!(h.worker.handle_delivery(delivery).await, Settlement::DeadLettered);
        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Dead));
        assert_eq!(h.store.ledger_len().await, 0);
    }

    #[tokio::test]
    async fn late_failure_does_not_dead_letter_completed_event() {
        let h = harness().await;
        let id = h.queue.enqueue(&message("ord_6", "prod_unknown")).await.unwrap();

        let stale = h.queue.claim(1, Duration::ZERO).await.unwrap().remove(0);
        let current = h.queue.claim(1, Duration::from_secs(60)).await.unwrap().remove(0);
        assert!(h.queue.ack(id, current.attempts).await.unwrap());

        // the stale consumer's integrity failure would normally retry
        let settlement = h.worker.handle_delivery(stale).await;

        assert_eq!(settlement, Settlement::Unsettled);
        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Completed));
        assert_eq!(h.alerts.count(AlertKind::DeadLettered), 0);
    }

    #[tokio::test]
    async fn stale_poison_delivery_raises_no_alert() {
        let h = harness().await;
        let id = h.queue.enqueue(&message("ord_7", "prod_basic")).await.unwrap();
        let stale = h.queue.claim(1, Duration::ZERO).await.unwrap().remove(0);
        let current = h.queue.claim(1, Duration::from_secs(60)).await.unwrap().remove(0);
        assert!(h.queue.ack(id, current.attempts).await.unwrap());

        let mut undecodable = stale;
        undecodable.payload["name"] = serde_json::Value::from("order.refunded");

        assert_eq!(h.worker.handle_delivery(undecodable).await, Settlement::Unsettled);
        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Completed));
        assert_eq!(h.alerts.count(AlertKind::DeadLettered), 0);
    }

    #[tokio::test]
    async fn transient_storage_failure_is_retried_then_credited_once() {
        let h = harness().await;
        let ledger = Arc::new(FlakyLedger::new(h.store.clone(), 1));
        let processor = Arc::new(FulfillmentProcessor::new(
            h.store.clone(),
            ledger.clone(),
            h.alerts.clone(),
        ));
        let config = FulfillmentWorkerConfig::from(&QueueConfig {
            backoff_unit_ms: 0,
            ..QueueConfig::default()
        });
        let worker = FulfillmentWorker::new(1, h.queue.clone(), processor, h.alerts.clone(), config);
        let id = h.queue.enqueue(&message("ord_8", "prod_basic")).await.unwrap();

        let first = h.queue.claim(1, Duration::from_secs(60)).await.unwrap().remove(0);
        assert_eq!(worker.handle_delivery(first).await, Settlement::Retrying);
        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Pending));
        assert_eq!(h.store.balance("u1").await, Some(5));
        assert_eq!(h.store.ledger_len().await, 0);

        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Completed));
        assert_eq!(h.store.balance("u1").await, Some(35));
        assert_eq!(h.store.ledger_len().await, 1);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.alerts.count(AlertKind::DeadLettered), 0);
    }

    #[tokio::test]
    async fn persistent_storage_failure_uses_transient_budget() {
        let h = harness().await;
        let ledger = Arc::new(FlakyLedger::new(h.store.clone(), u32::MAX));
        let processor = Arc::new(FulfillmentProcessor::new(
            h.store.clone(),
            ledger,
            h.alerts.clone(),
        ));
        let queue_config = QueueConfig {
            backoff_unit_ms: 0,
            ..QueueConfig::default()
        };
        let worker = FulfillmentWorker::new(
            1,
            h.queue.clone(),
            processor,
            h.alerts.clone(),
            FulfillmentWorkerConfig::from(&queue_config),
        );
        let id = h.queue.enqueue(&message("ord_9", "prod_basic")).await.unwrap();

        for _ in 1..queue_config.max_attempts {
            worker.run_once().await.unwrap();
            assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Pending));
        }
        worker.run_once().await.unwrap();

        assert_eq!(h.queue.status_of(id).await, Some(DeliveryStatus::Dead));
        let dead = h.queue.dead_letters(10).await.unwrap();
        assert_eq!(dead[0].attempts, queue_config.max_attempts);
        assert_eq!(h.store.balance("u1").await, Some(5));
    }

    #[tokio::test]
    async fn pool_stops_on_shutdown() {
        let h = harness().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let processor = Arc::new(FulfillmentProcessor::new(
            h.store.clone(),
            h.store.clone(),
            h.alerts.clone(),
        ));
        let handles = spawn_pool(
            3,
            h.queue.clone(),
            processor,
            h.alerts.clone(),
            FulfillmentWorkerConfig {
                poll_interval: Duration::from_millis(10),
                ..FulfillmentWorkerConfig::default()
            },
            shutdown_rx,
        );

        h.queue.enqueue(&message("ord_5", "prod_basic")).await.unwrap();
        for _ in 0..50 {
            if h.store.balance("u1").await == Some(35) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(h.store.balance("u1").await, Some(35));
    }
}
