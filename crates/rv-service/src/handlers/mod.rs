//! HTTP request handlers for Rendezvous.

pub mod candidates;
pub mod events;
pub mod health;
pub mod metrics;
pub mod rounds;
pub mod sessions;
pub mod state;
pub mod votes;

pub use candidates::{add_candidate, remove_candidate};
pub use events::session_events;
pub use health::health_check;
pub use metrics::metrics_handler;
pub use rounds::{abort_round, record_result, start_round, submit_answer, submit_stop};
pub use sessions::{complete_session, create_session, join_session, rename_self};
pub use state::{get_fairness, get_history, get_state};
pub use votes::{confirm_winner, get_leaders, toggle_vote};

use crate::actors::SessionActorHandle;
use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use crate::routes::AppState;
use axum::body::Bytes;
use common::types::SessionId;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body, answering 400 instead of Axum's default 422.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, RvError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "rv.handlers", error = %e, "Invalid request body");
        RvError::BadRequest("Invalid request body".to_string())
    })
}

/// Resolve the actor for the session in the path, checking the token scope.
pub(crate) async fn session_for(
    state: &AppState,
    claims: &ParticipantClaims,
    session_id: SessionId,
) -> Result<SessionActorHandle, RvError> {
    claims.ensure_session(session_id)?;
    state.registry.get_session(session_id).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::StartRoundRequest;

    #[test]
    fn test_parse_json_rejects_garbage_as_bad_request() {
        let err = parse_json::<StartRoundRequest>(&Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert_eq!(err, RvError::BadRequest("Invalid request body".to_string()));

        let err = parse_json::<StartRoundRequest>(&Bytes::from_static(
            br#"{"mechanic": "coin-flip"}"#,
        ))
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_parse_json_accepts_valid_body() {
        let request: StartRoundRequest =
            parse_json(&Bytes::from_static(br#"{"mechanic": "dice"}"#)).unwrap();
        assert_eq!(request.mechanic, crate::models::Mechanic::Dice);
    }
}
