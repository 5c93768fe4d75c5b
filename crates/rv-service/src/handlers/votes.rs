//! Voting and manual tie-break handlers.

use super::{parse_json, session_for};
use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use crate::models::{CandidateRequest, LeadersResponse, SelectionEvent, VoteToggle};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::SessionId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/sessions/:id/votes
///
/// Casts the caller's vote if absent, retracts it if present.
#[instrument(skip_all, name = "rv.vote.toggle", fields(session_id = %session_id))]
pub async fn toggle_vote(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<VoteToggle>, RvError> {
    let request: CandidateRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let toggle = session
        .toggle_vote(claims.participant_id, request.candidate_id)
        .await?;

    Ok(Json(toggle))
}

/// Handler for GET /api/v1/sessions/:id/votes/leaders
#[instrument(skip_all, name = "rv.vote.leaders", fields(session_id = %session_id))]
pub async fn get_leaders(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<LeadersResponse>, RvError> {
    let session = session_for(&state, &claims, session_id).await?;
    let leaders = session.leaders().await?;

    Ok(Json(LeadersResponse { leaders }))
}

/// Handler for POST /api/v1/sessions/:id/confirm
///
/// Owner picks one of the tied leaders.
///
/// # Response
///
/// - 201 Created: the recorded `manual-tiebreak` selection
/// - 403 Forbidden: caller is not the owner
/// - 409 Conflict: a round is in progress, or the candidate is not a leader
/// - 422 Unprocessable Entity: no votes yet
#[instrument(skip_all, name = "rv.vote.confirm", fields(session_id = %session_id))]
pub async fn confirm_winner(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<(StatusCode, Json<SelectionEvent>), RvError> {
    let request: CandidateRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let selection = session
        .confirm_winner(claims.participant_id, request.candidate_id)
        .await?;

    Ok((StatusCode::CREATED, Json(selection)))
}
