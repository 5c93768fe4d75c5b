//! Round handlers.
//!
//! - `POST /rounds` - Start a round; the caller becomes its owner and
//!   receives the result lease
//! - `POST /rounds/:round_id/result` - Round owner records the outcome
//! - `DELETE /rounds/:round_id` - Round owner aborts
//! - `POST /rounds/:round_id/answers` - Speed-quiz answer
//! - `POST /rounds/:round_id/stop` - Timing-duel stop time
//!
//! A second start while a round is active is answered with 409 and the
//! existing round is untouched.

use super::{parse_json, session_for};
use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use crate::models::{
    AnswerRequest, AnswerResponse, RecordResultRequest, SelectionEvent, StartRoundRequest,
    StartRoundResponse, StopRequest, StopResponse,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{RoundId, SessionId};
use std::sync::Arc;
use tracing::{info, instrument};

/// Handler for POST /api/v1/sessions/:id/rounds
///
/// # Response
///
/// - 201 Created: round view plus the lease for recording the result
/// - 400 Bad Request: `manual-tiebreak` is not a round mechanic
/// - 403 Forbidden: caller is not a participant
/// - 409 Conflict: another round is in progress
/// - 422 Unprocessable Entity: no candidates, or the session is completed
#[instrument(skip_all, name = "rv.round.start", fields(session_id = %session_id))]
pub async fn start_round(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path(session_id): Path<SessionId>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartRoundResponse>), RvError> {
    let request: StartRoundRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let (round, lease) = session
        .start_round(claims.participant_id, request.mechanic)
        .await?;

    info!(
        target: "rv.handlers.rounds",
        session_id = %session_id,
        round_id = %round.round_id,
        mechanic = request.mechanic.as_str(),
        "Round started"
    );

    Ok((StatusCode::CREATED, Json(StartRoundResponse { round, lease })))
}

/// Handler for POST /api/v1/sessions/:id/rounds/:round_id/result
///
/// The outcome was drawn by the server; the request only proves ownership
/// through the lease and optionally names the winner the client displayed.
///
/// # Response
///
/// - 201 Created: the appended selection event
/// - 403 Forbidden: not the round owner, or an invalid lease
/// - 408 Request Timeout: the lease expired
/// - 409 Conflict: result already recorded, or winner mismatch
/// - 422 Unprocessable Entity: round still in progress
#[instrument(
    skip_all,
    name = "rv.round.result",
    fields(session_id = %session_id, round_id = %round_id)
)]
pub async fn record_result(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path((session_id, round_id)): Path<(SessionId, RoundId)>,
    body: Bytes,
) -> Result<(StatusCode, Json<SelectionEvent>), RvError> {
    let request: RecordResultRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let selection = session
        .record_result(
            claims.participant_id,
            round_id,
            request.lease_token,
            request.winner,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(selection)))
}

/// Handler for DELETE /api/v1/sessions/:id/rounds/:round_id
#[instrument(
    skip_all,
    name = "rv.round.abort",
    fields(session_id = %session_id, round_id = %round_id)
)]
pub async fn abort_round(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path((session_id, round_id)): Path<(SessionId, RoundId)>,
) -> Result<StatusCode, RvError> {
    let session = session_for(&state, &claims, session_id).await?;
    session.abort_round(claims.participant_id, round_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/sessions/:id/rounds/:round_id/answers
///
/// At most one answer per participant per question; a second is a 409.
#[instrument(
    skip_all,
    name = "rv.round.answer",
    fields(session_id = %session_id, round_id = %round_id)
)]
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path((session_id, round_id)): Path<(SessionId, RoundId)>,
    body: Bytes,
) -> Result<Json<AnswerResponse>, RvError> {
    let request: AnswerRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let receipt = session
        .submit_answer(
            claims.participant_id,
            round_id,
            request.question_index,
            request.choice,
        )
        .await?;

    Ok(Json(receipt))
}

/// Handler for POST /api/v1/sessions/:id/rounds/:round_id/stop
#[instrument(
    skip_all,
    name = "rv.round.stop",
    fields(session_id = %session_id, round_id = %round_id)
)]
pub async fn submit_stop(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<ParticipantClaims>,
    Path((session_id, round_id)): Path<(SessionId, RoundId)>,
    body: Bytes,
) -> Result<Json<StopResponse>, RvError> {
    let request: StopRequest = parse_json(&body)?;

    let session = session_for(&state, &claims, session_id).await?;
    let receipt = session
        .submit_stop(claims.participant_id, round_id, request.stop_ms)
        .await?;

    Ok(Json(receipt))
}
