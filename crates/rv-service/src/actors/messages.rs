//! Actor mailbox messages and reply types.
//!
//! Requests carry a `respond_to` oneshot; the actor answers every request
//! exactly once, even when the caller has already gone away.

use super::round::RoundView;
use super::session::SessionActorHandle;
use crate::auth::RoundLease;
use crate::errors::RvError;
use crate::models::{
    Candidate, CandidateDraft, CandidateRemoval, Meeting, MeetingStatus, Mechanic, Participant,
    SelectionEvent, Tally, VoteToggle,
};
use crate::realtime::Revision;
use crate::services::FairnessReport;
use common::types::{CandidateId, ParticipantId, RoundId, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, RvError>>;

/// Messages handled by a `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    Join {
        display_name: String,
        respond_to: Reply<Participant>,
    },
    Rename {
        participant_id: ParticipantId,
        display_name: String,
        respond_to: Reply<Participant>,
    },
    Complete {
        requester: ParticipantId,
        respond_to: Reply<Meeting>,
    },
    AddCandidate {
        requester: ParticipantId,
        draft: CandidateDraft,
        respond_to: Reply<Candidate>,
    },
    RemoveCandidate {
        requester: ParticipantId,
        candidate_id: CandidateId,
        respond_to: Reply<CandidateRemoval>,
    },
    ToggleVote {
        participant_id: ParticipantId,
        candidate_id: CandidateId,
        respond_to: Reply<VoteToggle>,
    },
    Leaders {
        respond_to: Reply<Vec<CandidateId>>,
    },
    ConfirmWinner {
        requester: ParticipantId,
        candidate_id: CandidateId,
        respond_to: Reply<SelectionEvent>,
    },
    StartRound {
        requester: ParticipantId,
        mechanic: Mechanic,
        respond_to: Reply<(RoundView, RoundLease)>,
    },
    RecordResult {
        requester: ParticipantId,
        round_id: RoundId,
        lease_token: String,
        claimed_winner: Option<CandidateId>,
        respond_to: Reply<SelectionEvent>,
    },
    AbortRound {
        requester: ParticipantId,
        round_id: RoundId,
        respond_to: Reply<()>,
    },
    SubmitAnswer {
        participant_id: ParticipantId,
        round_id: RoundId,
        question_index: usize,
        choice: usize,
        respond_to: Reply<AnswerReceipt>,
    },
    SubmitStop {
        participant_id: ParticipantId,
        round_id: RoundId,
        stop_ms: u64,
        respond_to: Reply<StopReceipt>,
    },
    Reconcile {
        respond_to: Reply<StateSnapshot>,
    },
}

/// Accepted quiz answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerReceipt {
    pub round_id: RoundId,
    pub question_index: usize,
    pub correct: bool,
    pub points: u32,
    pub elapsed_ms: u64,
}

/// Accepted duel stop time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReceipt {
    pub round_id: RoundId,
    /// Stop time after clamping to the server clock.
    pub stop_ms: u64,
    /// Submission order, 0 for the first.
    pub order: usize,
}

/// Authoritative session state for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub session_id: SessionId,
    pub category: String,
    pub status: MeetingStatus,
    pub owner: ParticipantId,
    pub participants: Vec<Participant>,
    pub candidates: Vec<Candidate>,
    pub tally: Tally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_selection: Option<SelectionEvent>,
    pub fairness: FairnessReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_round: Option<RoundView>,
    pub revision: Revision,
}

/// Messages handled by the `SessionRegistry`.
#[derive(Debug)]
pub enum RegistryMessage {
    CreateSession {
        category: String,
        display_name: String,
        respond_to: Reply<CreatedSession>,
    },
    GetSession {
        session_id: SessionId,
        respond_to: Reply<SessionActorHandle>,
    },
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// A newly created session and its owner.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub handle: SessionActorHandle,
    pub meeting: Meeting,
    pub owner: Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub session_count: usize,
    pub active_rounds: usize,
    pub mailbox_depth: usize,
    pub is_shutting_down: bool,
}
