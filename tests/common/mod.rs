#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use plushify_backend::api;
use plushify_backend::config::AppConfig;
use plushify_backend::database::memory::{MemoryEventQueue, MemoryStore};
use plushify_backend::database::models::PlatformRole;
use plushify_backend::payments::signature::{
    WebhookVerifier, HEADER_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use plushify_backend::services::catalog::ProductCatalog;
use plushify_backend::workers::{FulfillmentWorker, FulfillmentWorkerConfig};
use plushify_backend::{AppState, Stores};

pub const WEBHOOK_SECRET: &str = "polar_whs_integration_secret";
pub const AUTH_SECRET: &str = "integration-auth-secret";
pub const ADMIN_TOKEN: &str = "admin-session-token";
pub const MEMBER_TOKEN: &str = "member-session-token";

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryEventQueue>,
}

/// In-memory application with the default catalog, user `u1` holding 5
/// credits, one admin session and one regular session.
pub async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryEventQueue::new());

    store
        .insert_user("u1", "u1@example.com", 5, PlatformRole::User)
        .await;
    store
        .insert_user("admin-1", "admin@example.com", 1, PlatformRole::Admin)
        .await;
    store
        .insert_user("member-1", "member@example.com", 1, PlatformRole::User)
        .await;
    let expires = Utc::now() + ChronoDuration::hours(1);
    store.insert_session(ADMIN_TOKEN, "admin-1", expires).await;
    store.insert_session(MEMBER_TOKEN, "member-1", expires).await;

    let mut config = AppConfig::default();
    config.skip_externals = true;
    config.webhook.secret = WEBHOOK_SECRET.to_string();
    config.auth.secret = AUTH_SECRET.to_string();
    config.queue.backoff_unit_ms = 0;
    config.queue.poll_interval_ms = 10;

    let stores = Stores::shared_memory(store.clone(), queue.clone());
    let catalog = ProductCatalog::new(stores.products.clone());
    catalog.seed_defaults().await.unwrap();

    let state = AppState::new(config, stores, catalog).unwrap();
    TestApp {
        state,
        store,
        queue,
    }
}

impl TestApp {
    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    pub fn worker(&self) -> FulfillmentWorker {
        FulfillmentWorker::new(
            0,
            self.state.stores.queue.clone(),
            self.state.fulfillment.clone(),
            self.state.alerts.clone(),
            FulfillmentWorkerConfig::from(&self.state.config.queue),
        )
    }

    /// Drives the worker until the queue has nothing due.
    pub async fn drain(&self) {
        let worker = self.worker();
        while worker.run_once().await.unwrap() > 0 {}
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn deliver(&self, body: &[u8]) -> (StatusCode, Value) {
        self.send(signed_webhook(body)).await
    }
}

pub fn order_paid(order_id: &str, user_id: Option<&str>, product_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "order.paid",
        "data": {
            "id": order_id,
            "checkout_id": "chk_1",
            "product_id": product_id,
            "total_amount": 900,
            "created_at": "2025-03-01T12:00:00Z",
            "customer": { "external_id": user_id, "email": "u1@example.com" }
        }
    }))
    .unwrap()
}

pub fn signed_webhook(body: &[u8]) -> Request<Body> {
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300)).unwrap();
    let timestamp = Utc::now().timestamp();
    let msg_id = format!("msg_{}", uuid::Uuid::new_v4());

    Request::builder()
        .method("POST")
        .uri("/webhooks/polar")
        .header(header::CONTENT_TYPE, "application/json")
        .header(HEADER_ID, &msg_id)
        .header(HEADER_TIMESTAMP, timestamp.to_string())
        .header(HEADER_SIGNATURE, verifier.sign(&msg_id, timestamp, body).unwrap())
        .body(Body::from(body.to_vec()))
        .unwrap()
}

pub fn admin_request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
