//! Ledger store.
//!
//! Durable keyed storage for meetings, participants, candidates, votes and the
//! append-only selection history. Two backends implement [`LedgerStore`]:
//!
//! - [`InMemoryLedger`] - one async mutex per session, used when no database
//!   is configured and in tests
//! - [`PgLedger`] - PostgreSQL via sqlx, one transaction per write
//!
//! All writes are atomic per session. Tallies are recomputed from vote rows on
//! every read.

mod memory;
mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

use crate::models::{
    Candidate, CandidateRemoval, Meeting, MeetingStatus, NewSelectionEvent, Participant,
    SelectionEvent, Tally, VoteToggle,
};
use common::types::{CandidateId, ParticipantId, SessionId};
use futures::stream::BoxStream;
use thiserror::Error;

/// Ledger error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The referenced candidate does not exist in the session.
    #[error("Unknown candidate")]
    UnknownCandidate,

    /// A write referenced a record that no longer exists.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub(crate) fn session_not_found() -> Self {
        LedgerError::NotFound("Session not found".to_string())
    }

    pub(crate) fn candidate_not_found() -> Self {
        LedgerError::NotFound("Candidate not found".to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

/// Storage contract shared by every backend.
///
/// Every method scoped to a session fails with [`LedgerError::NotFound`] when
/// the session does not exist.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short backend name for health output ("memory", "postgres").
    fn backend(&self) -> &'static str;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), LedgerError>;

    /// Store a new meeting together with its owner participant.
    async fn create_meeting(
        &self,
        meeting: &Meeting,
        owner: &Participant,
    ) -> Result<(), LedgerError>;

    async fn get_meeting(&self, session_id: SessionId) -> Result<Option<Meeting>, LedgerError>;

    async fn set_meeting_status(
        &self,
        session_id: SessionId,
        status: MeetingStatus,
    ) -> Result<(), LedgerError>;

    /// Insert a participant, or update the display name of an existing one.
    async fn upsert_participant(
        &self,
        session_id: SessionId,
        participant: &Participant,
    ) -> Result<(), LedgerError>;

    async fn get_participant(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<Option<Participant>, LedgerError>;

    async fn list_participants(&self, session_id: SessionId)
        -> Result<Vec<Participant>, LedgerError>;

    async fn put_candidate(&self, candidate: &Candidate) -> Result<(), LedgerError>;

    /// Candidates in creation order.
    async fn list_candidates(&self, session_id: SessionId) -> Result<Vec<Candidate>, LedgerError>;

    /// Remove a candidate and every vote referencing it.
    ///
    /// Fails with `NotFound` for an unknown candidate and `Forbidden` when
    /// `caller` is not the session owner.
    async fn remove_candidate(
        &self,
        session_id: SessionId,
        candidate_id: CandidateId,
        caller: ParticipantId,
    ) -> Result<CandidateRemoval, LedgerError>;

    /// Cast the vote if absent, retract it if present.
    ///
    /// Fails with `UnknownCandidate` when the candidate is not in the session.
    async fn toggle_vote(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<VoteToggle, LedgerError>;

    /// Tally recomputed from live vote rows.
    async fn tally(&self, session_id: SessionId) -> Result<Tally, LedgerError>;

    /// Append a selection event, assigning the next sequence number.
    ///
    /// Fails with `InvalidReference` when the winning candidate no longer
    /// exists in the session.
    async fn append_selection_event(
        &self,
        event: NewSelectionEvent,
    ) -> Result<SelectionEvent, LedgerError>;

    /// Selection history, newest first.
    ///
    /// The stream is finite and lazy; call again to restart it. An unknown
    /// session yields a single `NotFound` item.
    fn list_selection_history(
        &self,
        session_id: SessionId,
    ) -> BoxStream<'_, Result<SelectionEvent, LedgerError>>;
}
