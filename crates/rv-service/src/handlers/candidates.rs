//! Candidate pool handlers.

use super::{parse_json, session_for};
use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use crate::models::{Candidate, CandidateDraft, CandidateRemovedResponse};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{CandidateId, SessionId};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/sessions/:id/candidates
///
/// Any participant may add. Name and rating are validated by the actor.
#[instrument(skip_all, name = "rv.candidate.add", fields(session_id = %session_id))]
pub async fn add_candidate(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<(StatusCode, Json<Candidate>), RvError> {
    let draft: CandidateDraft = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let candidate = session.add_candidate(claims.participant_id, draft).await?;

    Ok((StatusCode::CREATED, Json(candidate)))
}

/// Handler for DELETE /api/v1/sessions/:id/candidates/:candidate_id
///
/// Owner only. Votes for the candidate are removed with it.
#[instrument(
    skip_all,
    name = "rv.candidate.remove",
    fields(session_id = %session_id, candidate_id = %candidate_id)
)]
pub async fn remove_candidate(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path((session_id, candidate_id)): Path<(SessionId, CandidateId)>,
) -> Result<Json<CandidateRemovedResponse>, RvError> {
    let session = session_for(&state, &claims, session_id).await?;
    let removal = session
        .remove_candidate(claims.participant_id, candidate_id)
        .await?;

    Ok(Json(CandidateRemovedResponse {
        candidate_id: removal.candidate.id,
        removed_votes: removal.removed_votes,
    }))
}
