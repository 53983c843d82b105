use plushify_backend::api;
use plushify_backend::cache::{init_cache_pool, RedisCache};
use plushify_backend::config::AppConfig;
use plushify_backend::database::memory::{MemoryEventQueue, MemoryStore};
use plushify_backend::database::{init_pool_from_config, run_migrations};
use plushify_backend::health::HealthChecker;
use plushify_backend::logging::init_tracing;
use plushify_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use plushify_backend::services::catalog::ProductCatalog;
use plushify_backend::services::reconciliation::LedgerReconciler;
use plushify_backend::workers::{spawn_pool, FulfillmentWorkerConfig, ReconciliationSweepWorker};
use plushify_backend::{AppState, Stores};

use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        e
    })?;
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        skip_externals = config.skip_externals,
        "🚀 Starting Plushify backend service"
    );

    // Storage: Postgres + Redis, or in-memory stores for local runs.
    let mut db_pool = None;
    let mut cache_pool = None;
    let stores = if config.skip_externals {
        info!("⏭️  Skipping Postgres and Redis (SKIP_EXTERNALS=true), using in-memory stores");
        Stores::in_memory(MemoryStore::new(), MemoryEventQueue::new())
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database connection pool initialized"
        );

        if config.database.run_migrations {
            info!("🗄️  Running database migrations...");
            run_migrations(&pool).await?;
            info!("✅ Migrations applied");
        }

        info!("🔄 Initializing Redis cache connection pool...");
        match init_cache_pool(&config.cache).await {
            Ok(pool) => cache_pool = Some(pool),
            Err(e) => warn!("⚠️  Redis unavailable, pricing served without cache: {}", e),
        }

        db_pool = Some(pool.clone());
        Stores::postgres(pool)
    };

    let mut catalog = ProductCatalog::new(stores.products.clone());
    if let Some(pool) = cache_pool.clone() {
        catalog = catalog.with_cache(RedisCache::new(
            pool,
            Duration::from_secs(config.cache.default_ttl),
        ));
    }
    if config.skip_externals {
        catalog.seed_defaults().await?;
    }

    let mut health = HealthChecker::new(stores.queue.clone());
    if let Some(pool) = db_pool.clone() {
        health = health.with_database(pool);
    }
    if let Some(pool) = cache_pool {
        health = health.with_cache(pool);
    }

    let queue_config = config.queue.clone();
    let server_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, stores, catalog)?.with_health(health);
    info!("✅ Services wired");

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles = spawn_pool(
        queue_config.workers,
        state.stores.queue.clone(),
        state.fulfillment.clone(),
        state.alerts.clone(),
        FulfillmentWorkerConfig::from(&queue_config),
        worker_shutdown_rx.clone(),
    );
    info!(workers = queue_config.workers, "✅ Fulfillment workers started");

    let reconciler = Arc::new(LedgerReconciler::new(
        state.stores.ledger.clone(),
        state.alerts.clone(),
        queue_config.reconcile_batch_size,
    ));
    let sweep = ReconciliationSweepWorker::new(
        reconciler,
        Duration::from_secs(queue_config.reconcile_interval_secs),
    );
    worker_handles.push(tokio::spawn(sweep.run(worker_shutdown_rx)));

    info!("🛣️  Setting up application routes...");
    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = server_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    // In-flight deliveries that miss this window are redelivered after their
    // visibility timeout.
    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(10), join_all(worker_handles))
        .await
        .is_err()
    {
        error!("Timed out waiting for workers to stop");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
