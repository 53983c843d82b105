//! Admin product management. Every handler answers with [`ActionResult`].

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use tracing::warn;
use uuid::Uuid;

use super::ActionResult;
use crate::error::AppError;
use crate::services::catalog::{CatalogError, CreateProductRequest, UpdateProductRequest};
use crate::AppState;

/// Client errors keep the catalog's own message; storage failures go through
/// [`ActionResult::from_app_error`] and collapse to `fallback`.
fn catalog_failure(err: CatalogError, fallback: &str) -> Response {
    let message = err.to_string();
    let app_error = AppError::from(err);
    match StatusCode::from_u16(app_error.status_code()) {
        Ok(status) if status.is_client_error() => ActionResult::failure(status, message),
        _ => ActionResult::from_app_error(&app_error, fallback),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| ActionResult::failure(StatusCode::NOT_FOUND, "Product not found"))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!(error = %rejection, "[Admin] Rejected product payload");
        ActionResult::failure(StatusCode::BAD_REQUEST, "Invalid request body")
    })
}

/// GET /api/admin/products: active and inactive products.
pub async fn list_products(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to fetch products");
    }

    match state.catalog.list_all().await {
        Ok(products) => ActionResult::ok(products),
        Err(e) => catalog_failure(e, "Failed to fetch products"),
    }
}

/// GET /api/admin/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to fetch product");
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.catalog.get_by_id(id).await {
        Ok(product) => ActionResult::ok(product),
        Err(e) => catalog_failure(e, "Failed to fetch product"),
    }
}

/// POST /api/admin/products
pub async fn create_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to create product");
    }
    let request = match body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.catalog.create(request).await {
        Ok(product) => ActionResult::ok(product),
        Err(e) => catalog_failure(e, "Failed to create product"),
    }
}

/// PATCH /api/admin/products/{id}
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to update product");
    }
    let (id, request) = match (parse_id(&id), body(payload)) {
        (Ok(id), Ok(request)) => (id, request),
        (Err(response), _) | (_, Err(response)) => return response,
    };

    match state.catalog.update(id, request).await {
        Ok(product) => ActionResult::ok(product),
        Err(e) => catalog_failure(e, "Failed to update product"),
    }
}

/// DELETE /api/admin/products/{id}
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to delete product");
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.catalog.delete(id).await {
        Ok(()) => ActionResult::ok(serde_json::json!({ "id": id })),
        Err(e) => catalog_failure(e, "Failed to delete product"),
    }
}

/// POST /api/admin/products/seed: inserts the default packages that are missing.
pub async fn seed_products(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to seed products");
    }

    match state.catalog.seed_defaults().await {
        Ok(inserted) => ActionResult::ok(inserted),
        Err(e) => catalog_failure(e, "Failed to seed products"),
    }
}
