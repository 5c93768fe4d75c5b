//! Client-side session view.
//!
//! `SessionView` is fed by two independent paths: push events from the
//! WebSocket and periodic `GET /state` snapshots. Either may arrive late or
//! out of order, so the view orders them by [`Revision`] (`epoch`, then
//! `seq`):
//!
//! - a snapshot replaces the view when its revision is at least the current
//!   one, so a snapshot from a rehydrated actor always wins
//! - an event applies only when it is exactly the next revision; older ones
//!   are ignored and a gap or a new epoch flags the view for resync
//! - a merged `round-result` also flags a resync, because only the server
//!   can recompute the fairness report

use super::events::{Revision, RoundProgress, SessionEvent};
use crate::actors::{RoundDetail, RoundPhase, StateSnapshot};
use crate::models::MeetingStatus;
use common::types::SessionId;

/// What `SessionView::apply_event` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Already reflected in the view.
    Stale,
    /// Missed events; the caller should fetch a snapshot.
    NeedsResync,
}

#[derive(Debug, Clone)]
pub struct SessionView {
    session_id: SessionId,
    state: Option<StateSnapshot>,
    needs_resync: bool,
}

impl SessionView {
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: None,
            needs_resync: true,
        }
    }

    #[must_use]
    pub fn state(&self) -> Option<&StateSnapshot> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn revision(&self) -> Option<Revision> {
        self.state.as_ref().map(|s| s.revision)
    }

    #[must_use]
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Replace the view with `snapshot` unless the view is already newer.
    ///
    /// Returns whether the snapshot was taken.
    pub fn apply_snapshot(&mut self, snapshot: StateSnapshot) -> bool {
        if snapshot.session_id != self.session_id {
            return false;
        }
        if self
            .state
            .as_ref()
            .is_some_and(|current| snapshot.revision < current.revision)
        {
            return false;
        }
        self.state = Some(snapshot);
        self.needs_resync = false;
        true
    }

    pub fn apply_event(&mut self, event: SessionEvent) -> ApplyOutcome {
        let Some(revision) = event.revision() else {
            // Resync frames carry no revision.
            self.needs_resync = true;
            return ApplyOutcome::NeedsResync;
        };
        let Some(state) = self.state.as_mut() else {
            self.needs_resync = true;
            return ApplyOutcome::NeedsResync;
        };

        if revision.epoch > state.revision.epoch {
            // The actor was respawned; its events do not continue this view.
            self.needs_resync = true;
            return ApplyOutcome::NeedsResync;
        }
        if revision <= state.revision {
            return ApplyOutcome::Stale;
        }
        if revision != state.revision.next() {
            self.needs_resync = true;
            return ApplyOutcome::NeedsResync;
        }

        let selection_recorded = matches!(event, SessionEvent::RoundResult { .. });
        merge(state, event);
        state.revision = revision;
        if selection_recorded {
            self.needs_resync = true;
        }
        ApplyOutcome::Applied
    }
}

fn merge(state: &mut StateSnapshot, event: SessionEvent) {
    match event {
        SessionEvent::ParticipantUpdated { participant, .. } => {
            match state.participants.iter_mut().find(|p| p.id == participant.id) {
                Some(existing) => *existing = participant,
                None => state.participants.push(participant),
            }
        }
        SessionEvent::CandidateAdded { candidate, .. } => {
            if !state.candidates.iter().any(|c| c.id == candidate.id) {
                state.candidates.push(candidate);
            }
        }
        SessionEvent::CandidateRemoved {
            candidate_id, tally, ..
        } => {
            state.candidates.retain(|c| c.id != candidate_id);
            state.tally = tally;
        }
        SessionEvent::TallyUpdated { tally, .. } => state.tally = tally,
        SessionEvent::RoundStarted { round, .. } => state.active_round = Some(round),
        SessionEvent::RoundProgress {
            round_id, progress, ..
        } => {
            if let Some(round) = state
                .active_round
                .as_mut()
                .filter(|r| r.round_id == round_id)
            {
                merge_progress(&mut round.phase, &mut round.detail, progress);
            }
        }
        SessionEvent::RoundResult { selection, .. } => {
            if state.active_round.as_ref().map(|r| r.round_id) == selection.round_id {
                state.active_round = None;
            }
            state.latest_selection = Some(selection);
        }
        SessionEvent::RoundCancelled { round_id, .. } => {
            if state
                .active_round
                .as_ref()
                .is_some_and(|r| r.round_id == round_id)
            {
                state.active_round = None;
            }
        }
        SessionEvent::SessionCompleted { .. } => {
            state.status = MeetingStatus::Completed;
            state.active_round = None;
        }
        SessionEvent::ResyncRequired { .. } => {}
    }
}

fn merge_progress(phase: &mut RoundPhase, detail: &mut RoundDetail, progress: RoundProgress) {
    match (detail, progress) {
        (
            RoundDetail::SpeedQuiz {
                question,
                closes_at,
                ..
            },
            RoundProgress::QuestionOpened {
                question: next,
                closes_at: next_closes_at,
            },
        ) => {
            *question = Some(next);
            *closes_at = Some(next_closes_at);
        }
        (
            RoundDetail::SpeedQuiz { answers, .. },
            RoundProgress::AnswerReceived { answers: total, .. },
        ) => *answers = total,
        (
            RoundDetail::TimingDuel { submitted, .. },
            RoundProgress::StopSubmitted {
                submitted: total, ..
            },
        ) => *submitted = total,
        (
            RoundDetail::SpeedQuiz {
                question,
                closes_at,
                outcome,
                ..
            },
            RoundProgress::AwaitingResult { outcome: drawn },
        ) => {
            *question = None;
            *closes_at = None;
            *outcome = Some(drawn);
            *phase = RoundPhase::Finishing;
        }
        (
            RoundDetail::TimingDuel { outcome, .. } | RoundDetail::Instant { outcome },
            RoundProgress::AwaitingResult { outcome: drawn },
        ) => {
            *outcome = Some(drawn);
            *phase = RoundPhase::Finishing;
        }
        _ => {}
    }
}
