use axum::{extract::State, response::IntoResponse};
use tracing::debug;

use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::AppState;

/// GET /api/pricing: active packages in display order, prices in dollars.
pub async fn get_pricing(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let entries = state.catalog.public_pricing().await?;
    debug!(count = entries.len(), "Serving pricing list");
    Ok(success_response(entries))
}
