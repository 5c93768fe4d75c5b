//! Read-side handlers: reconciliation snapshot, history and fairness.
//!
//! The snapshot goes through the session actor so its revision lines up with
//! the push channel. History and fairness read the ledger directly.

use crate::actors::StateSnapshot;
use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use crate::models::{HistoryQuery, HistoryResponse, SelectionEvent};
use crate::routes::AppState;
use crate::services::{fairness, FairnessReport};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use common::types::{CandidateId, SessionId};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::instrument;

/// History entries returned when the caller gives no limit.
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound on `?limit=`.
const MAX_HISTORY_LIMIT: usize = 500;

/// Handler for GET /api/v1/sessions/:id/state
#[instrument(skip_all, name = "rv.state.get", fields(session_id = %session_id))]
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<StateSnapshot>, RvError> {
    let session = super::session_for(&state, &claims, session_id).await?;
    let snapshot = session.reconcile().await?;
    Ok(Json(snapshot))
}

/// Handler for GET /api/v1/sessions/:id/history?limit=
///
/// Newest first. `limit` defaults to 50 and is capped at 500.
#[instrument(skip_all, name = "rv.state.history", fields(session_id = %session_id))]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, RvError> {
    claims.ensure_session(session_id)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let events: Vec<SelectionEvent> = state
        .ledger
        .list_selection_history(session_id)
        .take(limit)
        .try_collect()
        .await?;

    Ok(Json(HistoryResponse { events }))
}

/// Handler for GET /api/v1/sessions/:id/fairness
#[instrument(skip_all, name = "rv.state.fairness", fields(session_id = %session_id))]
pub async fn get_fairness(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<FairnessReport>, RvError> {
    claims.ensure_session(session_id)?;

    let candidates = state.ledger.list_candidates(session_id).await?;
    let history: Vec<SelectionEvent> = state
        .ledger
        .list_selection_history(session_id)
        .try_collect()
        .await?;

    let pool: Vec<CandidateId> = candidates.iter().map(|c| c.id).collect();
    Ok(Json(fairness::score(&pool, &history)))
}
