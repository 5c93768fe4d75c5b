//! Identity extracted from a verified participant token.

use crate::errors::RvError;
use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

/// Verified caller identity, inserted into request extensions by the auth
/// middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantClaims {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
}

impl ParticipantClaims {
    /// Tokens are scoped to one session; reject use against another.
    pub fn ensure_session(&self, session_id: SessionId) -> Result<(), RvError> {
        if self.session_id != session_id {
            tracing::debug!(
                target: "rv.auth",
                token_session = %self.session_id,
                path_session = %session_id,
                "Token presented for a different session"
            );
            return Err(RvError::Forbidden(
                "Token does not belong to this session".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_session() {
        let claims = ParticipantClaims {
            session_id: SessionId::new(),
            participant_id: ParticipantId::new(),
        };
        assert!(claims.ensure_session(claims.session_id).is_ok());
        assert!(matches!(
            claims.ensure_session(SessionId::new()),
            Err(RvError::Forbidden(_))
        ));
    }
}
