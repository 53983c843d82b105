//! Plushify backend: payment-to-credit fulfillment pipeline, product catalog
//! and the admin surface that configures it.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod queue;
pub mod services;
pub mod workers;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::memory::{MemoryEventQueue, MemoryStore};
use crate::database::repository::{CreditLedger, ProductStore, UserStore};
use crate::health::HealthChecker;
use crate::middleware::auth::AdminGuard;
use crate::payments::signature::WebhookVerifier;
use crate::payments::error::PaymentResult;
use crate::queue::EventQueue;
use crate::services::catalog::ProductCatalog;
use crate::services::fulfillment::FulfillmentProcessor;
use crate::services::identity::IdentityResolver;
use crate::services::notification::OperatorAlerts;
use crate::services::webhook_processor::WebhookProcessor;

/// Storage backends shared by every component.
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductStore>,
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub queue: Arc<dyn EventQueue>,
}

impl Stores {
    /// In-process stores used with `SKIP_EXTERNALS=true` and in tests.
    pub fn in_memory(store: MemoryStore, queue: MemoryEventQueue) -> Self {
        Self::shared_memory(Arc::new(store), Arc::new(queue))
    }

    /// Like [`Stores::in_memory`], keeping handles the caller can inspect.
    pub fn shared_memory(store: Arc<MemoryStore>, queue: Arc<MemoryEventQueue>) -> Self {
        Self {
            products: store.clone(),
            users: store.clone(),
            ledger: store,
            queue,
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::database::event_queue_repository::EventQueueRepository;
        use crate::database::ledger_repository::LedgerRepository;
        use crate::database::product_repository::ProductRepository;
        use crate::database::user_repository::UserRepository;

        Self {
            products: Arc::new(ProductRepository::new(pool.clone())),
            users: Arc::new(UserRepository::new(pool.clone())),
            ledger: Arc::new(LedgerRepository::new(pool.clone())),
            queue: Arc::new(EventQueueRepository::new(pool)),
        }
    }
}

/// Fully wired application services, shared by the HTTP layer and workers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: Stores,
    pub catalog: Arc<ProductCatalog>,
    pub webhook_processor: Arc<WebhookProcessor>,
    pub fulfillment: Arc<FulfillmentProcessor>,
    pub alerts: Arc<OperatorAlerts>,
    pub admin: Arc<AdminGuard>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    /// Wires services on top of the given stores. Fails only if the webhook
    /// secret cannot be turned into a signing key.
    pub fn new(config: AppConfig, stores: Stores, catalog: ProductCatalog) -> PaymentResult<Self> {
        let alerts = Arc::new(OperatorAlerts::new());
        let verifier = WebhookVerifier::from_config(&config.webhook)?;
        let identity = IdentityResolver::new(stores.users.clone());

        let webhook_processor = Arc::new(WebhookProcessor::new(
            verifier,
            identity,
            stores.queue.clone(),
            alerts.clone(),
        ));
        let fulfillment = Arc::new(FulfillmentProcessor::new(
            stores.products.clone(),
            stores.ledger.clone(),
            alerts.clone(),
        ));

        let admin = Arc::new(AdminGuard::new(stores.users.clone(), &config.auth));
        let health = Arc::new(HealthChecker::new(stores.queue.clone()));

        Ok(Self {
            config: Arc::new(config),
            stores,
            catalog: Arc::new(catalog),
            webhook_processor,
            fulfillment,
            alerts,
            admin,
            health,
        })
    }

    /// Replaces the default queue-only health checker.
    pub fn with_health(mut self, health: HealthChecker) -> Self {
        self.health = Arc::new(health);
        self
    }
}
