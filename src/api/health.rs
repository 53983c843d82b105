use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, info};

use crate::health::{HealthState, HealthStatus};
use crate::AppState;

pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    info!("🏥 Health check requested");
    let health_status = state.health.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
pub async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let result = health(state).await;
    if result.is_err() {
        error!("❌ Readiness check failed");
    }
    result
}

/// Liveness probe - the process is up and serving
pub async fn liveness() -> &'static str {
    "OK"
}
