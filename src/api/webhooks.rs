use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::webhook_processor::IngestOutcome;
use crate::AppState;

/// POST /webhooks/polar
///
/// 202 once the event is durably queued, 200 for event types we ignore.
/// The raw body is verified before anything is parsed.
pub async fn polar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(bytes = body.len(), "📥 Received Polar webhook");

    match state.webhook_processor.process_webhook(&headers, &body).await {
        Ok(IngestOutcome::Enqueued {
            message_id,
            order_id,
        }) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "orderId": order_id,
                "messageId": message_id,
            })),
        )
            .into_response(),
        Ok(IngestOutcome::Ignored { event_type }) => (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "eventType": event_type })),
        )
            .into_response(),
        Err(e) => {
            let mut err = AppError::from(e);
            if let Some(request_id) = get_request_id_from_headers(&headers) {
                err = err.with_request_id(request_id);
            }
            err.into_response()
        }
    }
}
