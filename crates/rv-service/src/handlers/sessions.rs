//! Session lifecycle handlers.
//!
//! - `POST /api/v1/sessions` - Create session (public)
//! - `POST /api/v1/sessions/:id/participants` - Join session (public)
//! - `PATCH /api/v1/sessions/:id/participants/me` - Rename self
//! - `POST /api/v1/sessions/:id/complete` - Owner completes the session
//!
//! Create and join are the only places participant tokens are issued.

use super::{parse_json, session_for};
use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use crate::models::{
    CreateSessionRequest, DisplayNameRequest, Meeting, Participant, SessionJoinedResponse,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::SessionId;
use std::sync::Arc;
use tracing::{info, instrument};

/// Handler for POST /api/v1/sessions
///
/// # Response
///
/// - 201 Created: session created, body carries the owner's token
/// - 400 Bad Request: invalid body, empty category or display name
#[instrument(skip_all, name = "rv.session.create")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionJoinedResponse>), RvError> {
    let request: CreateSessionRequest = parse_json(&body)?;

    let created = state
        .registry
        .create_session(request.category, request.display_name)
        .await?;

    let token = state
        .signer
        .issue_participant_token(created.meeting.id, created.owner.id)?;

    info!(
        target: "rv.handlers.sessions",
        session_id = %created.meeting.id,
        category = %created.meeting.category,
        "Session created"
    );

    Ok((
        StatusCode::CREATED,
        Json(SessionJoinedResponse {
            session_id: created.meeting.id,
            owner: created.owner.id,
            participant: created.owner,
            token,
        }),
    ))
}

/// Handler for POST /api/v1/sessions/:id/participants
///
/// # Response
///
/// - 201 Created: participant added, body carries their token
/// - 400 Bad Request: invalid body or display name
/// - 404 Not Found: unknown session
#[instrument(skip_all, name = "rv.session.join", fields(session_id = %session_id))]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionJoinedResponse>), RvError> {
    let request: DisplayNameRequest = parse_json(&body)?;

    let session = state.registry.get_session(session_id).await?;
    let participant = session.join(request.display_name).await?;
    let token = state
        .signer
        .issue_participant_token(session_id, participant.id)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionJoinedResponse {
            session_id,
            owner: session.owner(),
            participant,
            token,
        }),
    ))
}

/// Handler for PATCH /api/v1/sessions/:id/participants/me
#[instrument(skip_all, name = "rv.session.rename", fields(session_id = %session_id))]
pub async fn rename_self(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<Json<Participant>, RvError> {
    let request: DisplayNameRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let participant = session
        .rename(claims.participant_id, request.display_name)
        .await?;

    Ok(Json(participant))
}

/// Handler for POST /api/v1/sessions/:id/complete
///
/// # Response
///
/// - 200 OK: the completed meeting; any active round is cancelled
/// - 403 Forbidden: caller is not the owner
#[instrument(skip_all, name = "rv.session.complete", fields(session_id = %session_id))]
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Meeting>, RvError> {
    let session = session_for(&state, &claims, session_id).await?;
    let meeting = session.complete(claims.participant_id).await?;

    info!(
        target: "rv.handlers.sessions",
        session_id = %session_id,
        "Session completed"
    );

    Ok(Json(meeting))
}
