//! Prometheus metrics endpoint handler.
//!
//! Unauthenticated so Prometheus can scrape it. Labels are bounded: session,
//! participant and candidate IDs never appear in metrics.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns 200 OK with Prometheus text format:
/// ```text
/// # TYPE rv_http_requests_total counter
/// rv_http_requests_total{method="POST",endpoint="/api/v1/sessions/{session_id}/rounds",status_code="201"} 7
/// ```
#[tracing::instrument(skip_all, name = "rv.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
