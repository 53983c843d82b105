//! Operator views over the fulfillment pipeline.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::ActionResult;
use crate::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

fn list_params(params: Result<Query<ListParams>, QueryRejection>) -> Result<ListParams, Response> {
    params.map(|Query(params)| params).map_err(|rejection| {
        warn!(error = %rejection, "[Admin] Rejected list query");
        ActionResult::failure(StatusCode::BAD_REQUEST, "Invalid query parameters")
    })
}

/// GET /api/admin/fulfillment/failures
pub async fn list_failures(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to fetch failed events");
    }
    let params = match list_params(params) {
        Ok(params) => params,
        Err(response) => return response,
    };

    match state.stores.queue.dead_letters(params.limit()).await {
        Ok(dead) => ActionResult::ok(dead),
        Err(e) => {
            error!(error = %e, "[Admin] Failed to list dead-lettered events");
            ActionResult::failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch failed events")
        }
    }
}

/// POST /api/admin/fulfillment/failures/{id}/requeue
pub async fn requeue_failure(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let admin = match state.admin.require_admin(&headers).await {
        Ok(admin) => admin,
        Err(e) => return ActionResult::from_app_error(&e, "Failed to requeue event"),
    };
    let Ok(id) = Uuid::parse_str(&id) else {
        return ActionResult::failure(StatusCode::NOT_FOUND, "Failed event not found");
    };

    match state.stores.queue.requeue(id).await {
        Ok(true) => {
            info!(delivery_id = %id, admin = %admin.id, "Dead-lettered event requeued");
            ActionResult::ok(serde_json::json!({ "id": id }))
        }
        Ok(false) => ActionResult::failure(StatusCode::NOT_FOUND, "Failed event not found"),
        Err(e) => {
            error!(delivery_id = %id, error = %e, "[Admin] Failed to requeue event");
            ActionResult::failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to requeue event")
        }
    }
}

/// GET /api/admin/alerts: most recent operator alerts held in memory.
pub async fn list_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to fetch alerts");
    }
    let params = match list_params(params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    ActionResult::ok(state.alerts.recent(params.limit() as usize))
}

/// GET /api/users/{id}/ledger
pub async fn user_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = state.admin.require_admin(&headers).await {
        return ActionResult::from_app_error(&e, "Failed to fetch ledger");
    }

    match state.stores.ledger.list_for_user(&user_id).await {
        Ok(entries) => ActionResult::ok(entries),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "[Admin] Failed to fetch ledger");
            ActionResult::failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch ledger")
        }
    }
}
