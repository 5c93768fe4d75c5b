//! Vote coordinator.
//!
//! Thin rules layer over the ledger's atomic vote toggle. Ties are reported,
//! never broken; breaking them is the session owner's call.

use crate::errors::RvError;
use crate::ledger::LedgerStore;
use crate::models::{Tally, VoteToggle};
use common::types::{CandidateId, ParticipantId, SessionId};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct VoteCoordinator {
    ledger: Arc<dyn LedgerStore>,
}

impl VoteCoordinator {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Cast the participant's vote for `candidate_id`, or retract it if
    /// already cast.
    ///
    /// # Errors
    ///
    /// - `RvError::InvalidState` - the session has no candidates yet
    /// - `RvError::InvalidCandidate` - the candidate is not in the session
    #[instrument(skip(self), fields(session_id = %session_id, candidate_id = %candidate_id))]
    pub async fn cast_or_retract_vote(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<VoteToggle, RvError> {
        let candidates = self.ledger.list_candidates(session_id).await?;
        if candidates.is_empty() {
            return Err(RvError::no_candidates());
        }
        if !candidates.iter().any(|c| c.id == candidate_id) {
            return Err(RvError::InvalidCandidate("Candidate not found".to_string()));
        }

        let toggle = self
            .ledger
            .toggle_vote(session_id, participant_id, candidate_id)
            .await?;

        tracing::debug!(
            target: "rv.services.votes",
            session_id = %session_id,
            candidate_id = %candidate_id,
            cast = toggle.cast,
            votes = toggle.tally.votes_for(candidate_id),
            "Vote toggled"
        );
        Ok(toggle)
    }

    pub async fn tally(&self, session_id: SessionId) -> Result<Tally, RvError> {
        Ok(self.ledger.tally(session_id).await?)
    }

    /// Candidates tied for the most votes; empty when nobody voted.
    pub async fn winning_candidates(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CandidateId>, RvError> {
        Ok(self.tally(session_id).await?.leaders())
    }
}
