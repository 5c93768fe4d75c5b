//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::instrument;

/// Health check handler.
///
/// Pings the ledger and asks the registry for its session count.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "ledger": "postgres",
///   "active_sessions": 3
/// }
/// ```
///
/// Answers 503 with `"status": "unhealthy"` when the ledger ping fails, so
/// orchestrators still see a body.
#[instrument(skip_all, name = "rv.health.check")]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let ledger_healthy = match state.ledger.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "rv.health", error = %e, "Ledger ping failed");
            false
        }
    };

    let active_sessions = state
        .registry
        .get_status()
        .await
        .ok()
        .map(|status| status.session_count);

    let response = HealthResponse {
        status: if ledger_healthy { "healthy" } else { "unhealthy" }.to_string(),
        ledger: state.ledger.backend().to_string(),
        active_sessions,
    };

    let status = if ledger_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
