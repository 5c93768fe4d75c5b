//! Session events pushed to subscribers.
//!
//! Every event carries the session revision it produced. Within one actor
//! epoch the sequence increases by exactly one per event, so a subscriber
//! that sees a gap knows it missed something and should reconcile.

use crate::actors::RoundView;
use crate::mechanics::{MechanicOutcome, QuestionView};
use crate::models::{Candidate, Mechanic, Participant, SelectionEvent, Tally};
use chrono::{DateTime, Utc};
use common::types::{CandidateId, ParticipantId, RoundId, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Position of a change in a session's history, ordered by `(epoch, seq)`.
///
/// A session actor draws a fresh epoch when it is spawned and restarts `seq`
/// at 0. Epochs only grow, so anything from a rehydrated actor orders after
/// everything its predecessor produced.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Revision {
    pub epoch: u64,
    pub seq: u64,
}

impl Revision {
    #[must_use]
    pub const fn new(epoch: u64, seq: u64) -> Self {
        Self { epoch, seq }
    }

    /// Start of a new actor epoch: wall-clock milliseconds, bumped past the
    /// last epoch handed out by this process.
    #[must_use]
    pub fn initial() -> Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let previous = match LAST_EPOCH.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        }) {
            Ok(last) | Err(last) => last,
        };
        Self::new(now.max(previous.saturating_add(1)), 0)
    }

    /// The revision right after this one in the same epoch.
    #[must_use]
    pub const fn next(self) -> Self {
        Self::new(self.epoch, self.seq.saturating_add(1))
    }
}

/// In-round progress reported through `round-progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum RoundProgress {
    QuestionOpened {
        question: QuestionView,
        closes_at: DateTime<Utc>,
    },
    AnswerReceived {
        question_index: usize,
        participant_id: ParticipantId,
        answers: usize,
    },
    QuestionClosed {
        question_index: usize,
        correct_option: usize,
    },
    StopSubmitted {
        participant_id: ParticipantId,
        submitted: usize,
    },
    /// Play is over; the owner may now record the result.
    AwaitingResult { outcome: MechanicOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    ParticipantUpdated {
        session_id: SessionId,
        revision: Revision,
        participant: Participant,
    },
    CandidateAdded {
        session_id: SessionId,
        revision: Revision,
        candidate: Candidate,
    },
    CandidateRemoved {
        session_id: SessionId,
        revision: Revision,
        candidate_id: CandidateId,
        removed_votes: usize,
        tally: Tally,
    },
    TallyUpdated {
        session_id: SessionId,
        revision: Revision,
        tally: Tally,
    },
    RoundStarted {
        session_id: SessionId,
        revision: Revision,
        mechanic: Mechanic,
        round: RoundView,
    },
    RoundProgress {
        session_id: SessionId,
        revision: Revision,
        round_id: RoundId,
        mechanic: Mechanic,
        progress: RoundProgress,
    },
    /// A selection was persisted, by a round or a manual tie-break.
    RoundResult {
        session_id: SessionId,
        revision: Revision,
        mechanic: Mechanic,
        selection: SelectionEvent,
    },
    RoundCancelled {
        session_id: SessionId,
        revision: Revision,
        round_id: RoundId,
        mechanic: Mechanic,
        reason: String,
    },
    SessionCompleted {
        session_id: SessionId,
        revision: Revision,
    },
    /// Sent by the push channel itself when the subscriber fell behind.
    ResyncRequired { session_id: SessionId, missed: u64 },
}

impl SessionEvent {
    /// Revision produced by this event; `None` for control frames.
    pub fn revision(&self) -> Option<Revision> {
        match self {
            SessionEvent::ParticipantUpdated { revision, .. }
            | SessionEvent::CandidateAdded { revision, .. }
            | SessionEvent::CandidateRemoved { revision, .. }
            | SessionEvent::TallyUpdated { revision, .. }
            | SessionEvent::RoundStarted { revision, .. }
            | SessionEvent::RoundProgress { revision, .. }
            | SessionEvent::RoundResult { revision, .. }
            | SessionEvent::RoundCancelled { revision, .. }
            | SessionEvent::SessionCompleted { revision, .. } => Some(*revision),
            SessionEvent::ResyncRequired { .. } => None,
        }
    }

    /// Wire name, also used as the metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::ParticipantUpdated { .. } => "participant-updated",
            SessionEvent::CandidateAdded { .. } => "candidate-added",
            SessionEvent::CandidateRemoved { .. } => "candidate-removed",
            SessionEvent::TallyUpdated { .. } => "tally-updated",
            SessionEvent::RoundStarted { .. } => "round-started",
            SessionEvent::RoundProgress { .. } => "round-progress",
            SessionEvent::RoundResult { .. } => "round-result",
            SessionEvent::RoundCancelled { .. } => "round-cancelled",
            SessionEvent::SessionCompleted { .. } => "session-completed",
            SessionEvent::ResyncRequired { .. } => "resync-required",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let session_id = SessionId::new();
        let event = SessionEvent::RoundCancelled {
            session_id,
            revision: Revision::new(7, 4),
            round_id: RoundId::new(),
            mechanic: Mechanic::TimingDuel,
            reason: "No one stopped the clock before the deadline".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["mechanic"], "timing-duel");
        assert_eq!(json["revision"]["epoch"], 7);
        assert_eq!(json["revision"]["seq"], 4);
        assert_eq!(json["session_id"], session_id.to_string());

        let back: SessionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_progress_stage_tag() {
        let event = SessionEvent::RoundProgress {
            session_id: SessionId::new(),
            revision: Revision::new(1, 9),
            round_id: RoundId::new(),
            mechanic: Mechanic::SpeedQuiz,
            progress: RoundProgress::QuestionClosed {
                question_index: 1,
                correct_option: 3,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "round-progress");
        assert_eq!(json["progress"]["stage"], "question-closed");
        assert_eq!(json["progress"]["correct_option"], 3);
    }

    #[test]
    fn test_control_frames_have_no_revision() {
        let resync = SessionEvent::ResyncRequired {
            session_id: SessionId::new(),
            missed: 3,
        };
        assert_eq!(resync.revision(), None);
        assert_eq!(resync.kind(), "resync-required");

        let done = SessionEvent::SessionCompleted {
            session_id: SessionId::new(),
            revision: Revision::new(1, 2),
        };
        assert_eq!(done.revision(), Some(Revision::new(1, 2)));
    }

    #[test]
    fn test_revision_orders_by_epoch_first() {
        let old = Revision::new(10, 250);
        let respawned = Revision::new(11, 0);
        assert!(respawned > old);
        assert!(old.next() > old);
        assert_eq!(old.next().epoch, 10);
    }

    #[test]
    fn test_initial_epochs_strictly_increase() {
        let first = Revision::initial();
        let second = Revision::initial();
        assert!(second.epoch > first.epoch);
        assert_eq!(second.seq, 0);
    }
}
