//! Metrics definitions for Rendezvous.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rv_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max
//! - `endpoint`: route templates only, anything else is `/other`
//! - `mechanic`: 5 values
//! - `outcome`: recorded, cancelled, expired, aborted
//! - `event`: bounded by `SessionEvent` variants

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by
/// `GET /metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rv_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Rounds last from milliseconds (dice) to minutes (quiz)
        .set_buckets_for_metric(
            Matcher::Prefix("rv_round_duration".to_string()),
            &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
        )
        .map_err(|e| format!("Failed to set round duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `rv_http_requests_total`, `rv_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rv_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rv_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Route templates reported as the `endpoint` label.
const KNOWN_ENDPOINTS: &[&str] = &[
    "/api/v1/sessions",
    "/api/v1/sessions/{session_id}/participants",
    "/api/v1/sessions/{session_id}/participants/me",
    "/api/v1/sessions/{session_id}/complete",
    "/api/v1/sessions/{session_id}/candidates",
    "/api/v1/sessions/{session_id}/candidates/{candidate_id}",
    "/api/v1/sessions/{session_id}/votes",
    "/api/v1/sessions/{session_id}/votes/leaders",
    "/api/v1/sessions/{session_id}/confirm",
    "/api/v1/sessions/{session_id}/rounds",
    "/api/v1/sessions/{session_id}/rounds/{round_id}",
    "/api/v1/sessions/{session_id}/rounds/{round_id}/result",
    "/api/v1/sessions/{session_id}/rounds/{round_id}/answers",
    "/api/v1/sessions/{session_id}/rounds/{round_id}/stop",
    "/api/v1/sessions/{session_id}/state",
    "/api/v1/sessions/{session_id}/history",
    "/api/v1/sessions/{session_id}/fairness",
    "/api/v1/sessions/{session_id}/events",
];

/// Normalize a request path to its route template.
///
/// Identifier segments following `sessions`, `candidates` and `rounds` are
/// replaced with placeholders. Paths that match no known route become
/// `/other`.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" => return path.to_string(),
        _ => {}
    }

    let mut previous = "";
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| {
            let replaced = match previous {
                "sessions" if is_uuid(segment) => "{session_id}",
                "candidates" if is_uuid(segment) => "{candidate_id}",
                "rounds" if is_uuid(segment) => "{round_id}",
                _ => segment,
            };
            previous = segment;
            replaced
        })
        .collect();
    let template = segments.join("/");

    if KNOWN_ENDPOINTS.contains(&template.as_str()) {
        template
    } else {
        "/other".to_string()
    }
}

fn is_uuid(segment: &str) -> bool {
    uuid::Uuid::parse_str(segment).is_ok()
}

// ============================================================================
// Round Metrics
// ============================================================================

/// Record a round start.
///
/// Metric: `rv_rounds_started_total`
/// Labels: `mechanic`
pub fn record_round_started(mechanic: &str) {
    counter!("rv_rounds_started_total",
        "mechanic" => mechanic.to_string()
    )
    .increment(1);
}

/// Record a round reaching a terminal state.
///
/// Metric: `rv_rounds_finished_total`, `rv_round_duration_seconds`
/// Labels: `mechanic`, `outcome`
///
/// Outcomes: "recorded", "cancelled", "expired", "aborted"
pub fn record_round_finished(mechanic: &str, outcome: &str, duration: Duration) {
    histogram!("rv_round_duration_seconds",
        "mechanic" => mechanic.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rv_rounds_finished_total",
        "mechanic" => mechanic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a persisted selection event.
///
/// Metric: `rv_selections_total`
/// Labels: `mechanic`
pub fn record_selection(mechanic: &str) {
    counter!("rv_selections_total",
        "mechanic" => mechanic.to_string()
    )
    .increment(1);
}

// ============================================================================
// Vote Metrics
// ============================================================================

/// Record a vote toggle.
///
/// Metric: `rv_votes_total`
/// Labels: `action` ("cast" or "retract")
pub fn record_vote(cast: bool) {
    let action = if cast { "cast" } else { "retract" };
    counter!("rv_votes_total",
        "action" => action
    )
    .increment(1);
}

// ============================================================================
// Realtime Metrics
// ============================================================================

/// Record a session event broadcast.
///
/// Metric: `rv_events_broadcast_total`
/// Labels: `event`, `delivered` ("true" when at least one subscriber got it)
pub fn record_broadcast(event: &str, delivered: bool) {
    counter!("rv_events_broadcast_total",
        "event" => event.to_string(),
        "delivered" => delivered.to_string()
    )
    .increment(1);
}

/// Record events a WebSocket subscriber missed by lagging.
///
/// Metric: `rv_events_lagged_total`
pub fn record_lagged(missed: u64) {
    counter!("rv_events_lagged_total").increment(missed);
}

/// Set the number of open WebSocket subscribers.
///
/// Metric: `rv_ws_connections`
pub fn set_ws_connections(count: usize) {
    gauge!("rv_ws_connections").set(count as f64);
}

/// Set the number of live session actors.
///
/// Metric: `rv_active_sessions`
pub fn set_active_sessions(count: usize) {
    gauge!("rv_active_sessions").set(count as f64);
}
