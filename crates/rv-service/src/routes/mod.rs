//! HTTP routes for Rendezvous.
//!
//! Defines the Axum router and application state.

use crate::actors::SessionRegistryHandle;
use crate::auth::TokenSigner;
use crate::config::Config;
use crate::handlers;
use crate::ledger::LedgerStore;
use crate::middleware::{http_metrics_middleware, require_participant, AuthState};
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Supervisor for the per-meeting session actors.
    pub registry: SessionRegistryHandle,

    /// Ledger for reads that bypass the actors (history, fairness).
    pub ledger: Arc<dyn LedgerStore>,

    /// Issues participant tokens on create and join.
    pub signer: Arc<TokenSigner>,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe with ledger ping - public, unversioned
/// - `/metrics` - Prometheus metrics endpoint - public, unversioned
/// - `POST /api/v1/sessions` - Create session (public, returns owner token)
/// - `POST /api/v1/sessions/:id/participants` - Join (public, returns token)
/// - `GET /api/v1/sessions/:id/events?token=` - WebSocket push channel,
///   token in the query string
/// - everything else under `/api/v1/sessions/:id` requires a participant token
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        signer: Arc::clone(&state.signer),
    });

    // Public routes (no bearer token required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/sessions", post(handlers::create_session))
        .route(
            "/api/v1/sessions/:id/participants",
            post(handlers::join_session),
        )
        // Browsers cannot set headers on a WebSocket upgrade
        .route("/api/v1/sessions/:id/events", get(handlers::session_events))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Participant routes (bearer token required)
    let protected_routes = Router::new()
        .route(
            "/api/v1/sessions/:id/participants/me",
            patch(handlers::rename_self),
        )
        .route(
            "/api/v1/sessions/:id/complete",
            post(handlers::complete_session),
        )
        .route(
            "/api/v1/sessions/:id/candidates",
            post(handlers::add_candidate),
        )
        .route(
            "/api/v1/sessions/:id/candidates/:candidate_id",
            delete(handlers::remove_candidate),
        )
        .route("/api/v1/sessions/:id/votes", post(handlers::toggle_vote))
        .route(
            "/api/v1/sessions/:id/votes/leaders",
            get(handlers::get_leaders),
        )
        .route(
            "/api/v1/sessions/:id/confirm",
            post(handlers::confirm_winner),
        )
        .route("/api/v1/sessions/:id/rounds", post(handlers::start_round))
        .route(
            "/api/v1/sessions/:id/rounds/:round_id",
            delete(handlers::abort_round),
        )
        .route(
            "/api/v1/sessions/:id/rounds/:round_id/result",
            post(handlers::record_result),
        )
        .route(
            "/api/v1/sessions/:id/rounds/:round_id/answers",
            post(handlers::submit_answer),
        )
        .route(
            "/api/v1/sessions/:id/rounds/:round_id/stop",
            post(handlers::submit_stop),
        )
        .route("/api/v1/sessions/:id/state", get(handlers::get_state))
        .route("/api/v1/sessions/:id/history", get(handlers::get_history))
        .route("/api/v1/sessions/:id/fairness", get(handlers::get_fairness))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_participant,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
