//! HTTP surface: webhook ingestion, public pricing, admin catalog and
//! fulfillment operations, health probes.

pub mod fulfillment;
pub mod health;
pub mod pricing;
pub mod products;
pub mod webhooks;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::AppError;
use crate::AppState;

/// Uniform result of every admin operation. Failures never leak internals:
/// `error` is always a message meant for the admin UI.
#[derive(Debug, Serialize)]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ActionResult<T> {
    pub fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ActionResult {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

impl ActionResult<()> {
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(ActionResult::<()> {
                success: false,
                data: None,
                error: Some(message.into()),
            }),
        )
            .into_response()
    }

    /// Auth failures keep their own messages ("Unauthorized", "Admin access
    /// required"); anything else collapses to `fallback`.
    pub fn from_app_error(err: &AppError, fallback: &str) -> Response {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = ?err, "Admin operation failed");
            Self::failure(status, fallback)
        } else {
            Self::failure(status, err.user_message())
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/polar", post(webhooks::polar_webhook))
        .route("/api/pricing", get(pricing::get_pricing))
        .route(
            "/api/admin/products",
            get(products::list_products).post(products::create_product),
        )
        .route("/api/admin/products/seed", post(products::seed_products))
        .route(
            "/api/admin/products/{id}",
            get(products::get_product)
                .patch(products::update_product)
                .delete(products::delete_product),
        )
        .route(
            "/api/admin/fulfillment/failures",
            get(fulfillment::list_failures),
        )
        .route(
            "/api/admin/fulfillment/failures/{id}/requeue",
            post(fulfillment::requeue_failure),
        )
        .route("/api/admin/alerts", get(fulfillment::list_alerts))
        .route("/api/users/{id}/ledger", get(fulfillment::user_ledger))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .with_state(state)
}
