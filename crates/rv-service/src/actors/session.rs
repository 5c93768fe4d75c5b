//! `SessionActor` - per-meeting actor that serializes every mutation.
//!
//! Each `SessionActor`:
//! - Owns the cached meeting and participant list
//! - Runs at most one round at a time and enforces its deadlines
//! - Broadcasts a `SessionEvent` for every change, bumping the revision
//!
//! # Deadlines
//!
//! The loop sleeps until the active round's next deadline: the current quiz
//! question's window, the duel's `auto_end_at`, or the lease expiry. Rounds
//! nobody finishes are therefore released without client help.
//!
//! Without a round it sleeps until the idle timeout instead. If nobody is
//! subscribed by then, the actor closes its mailbox, answers whatever was
//! already queued, and exits. The registry sweep drops the finished task and
//! the next access rehydrates from the ledger.

use super::messages::{AnswerReceipt, Reply, SessionMessage, StateSnapshot, StopReceipt};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::round::{wall_clock, ActiveRound, RoundEnding, RoundPhase, RoundPlay, RoundView};
use crate::auth::{RoundLease, TokenError, TokenSigner};
use crate::config::RoundSettings;
use crate::errors::RvError;
use crate::ledger::LedgerStore;
use crate::mechanics::{MechanicError, RoundContext, SelectionPayload};
use crate::models::{
    validate_display_name, Candidate, CandidateDraft, CandidateRemoval, Meeting, MeetingStatus,
    Mechanic, NewSelectionEvent, Participant, SelectionEvent, VoteToggle,
};
use crate::observability::metrics;
use crate::realtime::{Revision, RoundProgress, SessionEvent};
use crate::services::{fairness, VoteCoordinator};

use chrono::Utc;
use common::types::{CandidateId, ParticipantId, RoundId, SessionId};
use futures::TryStreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// Finished rounds remembered for precise late-call errors.
const RECENT_ROUNDS: usize = 32;

const LEASE_EXPIRED: &str = "The round lease expired before the result was recorded";
const POOL_CHANGED: &str = "Candidate pool changed during the round";

/// Shared dependencies handed to every session actor.
#[derive(Clone)]
pub struct SessionDeps {
    pub ledger: Arc<dyn LedgerStore>,
    pub signer: Arc<TokenSigner>,
    pub settings: RoundSettings,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    session_id: SessionId,
    owner: ParticipantId,
    sender: mpsc::Sender<SessionMessage>,
    events: broadcast::Sender<SessionEvent>,
    mailbox: Arc<MailboxMonitor>,
    cancel_token: CancellationToken,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The meeting owner never changes, so the handle carries it.
    #[must_use]
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    /// Live event stream from this moment on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionMessage,
    ) -> Result<T, RvError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(build(tx)).await {
            self.mailbox.record_abandoned();
            error!(
                target: "rv.actor.session",
                session_id = %self.session_id,
                error = %e,
                "Session channel send failed"
            );
            return Err(RvError::Internal);
        }

        rx.await.map_err(|e| {
            error!(
                target: "rv.actor.session",
                session_id = %self.session_id,
                error = %e,
                "Session response receive failed"
            );
            RvError::Internal
        })?
    }

    pub async fn join(&self, display_name: String) -> Result<Participant, RvError> {
        self.request(|respond_to| SessionMessage::Join {
            display_name,
            respond_to,
        })
        .await
    }

    pub async fn rename(
        &self,
        participant_id: ParticipantId,
        display_name: String,
    ) -> Result<Participant, RvError> {
        self.request(|respond_to| SessionMessage::Rename {
            participant_id,
            display_name,
            respond_to,
        })
        .await
    }

    pub async fn complete(&self, requester: ParticipantId) -> Result<Meeting, RvError> {
        self.request(|respond_to| SessionMessage::Complete {
            requester,
            respond_to,
        })
        .await
    }

    pub async fn add_candidate(
        &self,
        requester: ParticipantId,
        draft: CandidateDraft,
    ) -> Result<Candidate, RvError> {
        self.request(|respond_to| SessionMessage::AddCandidate {
            requester,
            draft,
            respond_to,
        })
        .await
    }

    pub async fn remove_candidate(
        &self,
        requester: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<CandidateRemoval, RvError> {
        self.request(|respond_to| SessionMessage::RemoveCandidate {
            requester,
            candidate_id,
            respond_to,
        })
        .await
    }

    pub async fn toggle_vote(
        &self,
        participant_id: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<VoteToggle, RvError> {
        self.request(|respond_to| SessionMessage::ToggleVote {
            participant_id,
            candidate_id,
            respond_to,
        })
        .await
    }

    pub async fn leaders(&self) -> Result<Vec<CandidateId>, RvError> {
        self.request(|respond_to| SessionMessage::Leaders { respond_to })
            .await
    }

    pub async fn confirm_winner(
        &self,
        requester: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<SelectionEvent, RvError> {
        self.request(|respond_to| SessionMessage::ConfirmWinner {
            requester,
            candidate_id,
            respond_to,
        })
        .await
    }

    pub async fn start_round(
        &self,
        requester: ParticipantId,
        mechanic: Mechanic,
    ) -> Result<(RoundView, RoundLease), RvError> {
        self.request(|respond_to| SessionMessage::StartRound {
            requester,
            mechanic,
            respond_to,
        })
        .await
    }

    pub async fn record_result(
        &self,
        requester: ParticipantId,
        round_id: RoundId,
        lease_token: String,
        claimed_winner: Option<CandidateId>,
    ) -> Result<SelectionEvent, RvError> {
        self.request(|respond_to| SessionMessage::RecordResult {
            requester,
            round_id,
            lease_token,
            claimed_winner,
            respond_to,
        })
        .await
    }

    pub async fn abort_round(
        &self,
        requester: ParticipantId,
        round_id: RoundId,
    ) -> Result<(), RvError> {
        self.request(|respond_to| SessionMessage::AbortRound {
            requester,
            round_id,
            respond_to,
        })
        .await
    }

    pub async fn submit_answer(
        &self,
        participant_id: ParticipantId,
        round_id: RoundId,
        question_index: usize,
        choice: usize,
    ) -> Result<AnswerReceipt, RvError> {
        self.request(|respond_to| SessionMessage::SubmitAnswer {
            participant_id,
            round_id,
            question_index,
            choice,
            respond_to,
        })
        .await
    }

    pub async fn submit_stop(
        &self,
        participant_id: ParticipantId,
        round_id: RoundId,
        stop_ms: u64,
    ) -> Result<StopReceipt, RvError> {
        self.request(|respond_to| SessionMessage::SubmitStop {
            participant_id,
            round_id,
            stop_ms,
            respond_to,
        })
        .await
    }

    pub async fn reconcile(&self) -> Result<StateSnapshot, RvError> {
        self.request(|respond_to| SessionMessage::Reconcile { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// True once the actor stopped taking mail.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves once the actor stopped taking mail.
    pub async fn closed(&self) {
        self.sender.closed().await;
    }

    /// Resolves once the actor has been told to stop.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await;
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    meeting: Meeting,
    participants: HashMap<ParticipantId, Participant>,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    ledger: Arc<dyn LedgerStore>,
    signer: Arc<TokenSigner>,
    votes: VoteCoordinator,
    settings: RoundSettings,
    events: broadcast::Sender<SessionEvent>,
    round: Option<ActiveRound>,
    recent_rounds: VecDeque<(RoundId, RoundEnding)>,
    /// Fresh epoch per spawn; `seq` bumped once per broadcast event.
    revision: Revision,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionActor {
    /// Spawn an actor for an existing meeting.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        meeting: Meeting,
        participants: Vec<Participant>,
        deps: SessionDeps,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (events, _) = broadcast::channel(deps.settings.event_buffer_capacity.max(1));
        let session_id = meeting.id;
        let owner = meeting.owner;
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Session,
            session_id.to_string(),
        ));

        deps.metrics.session_started();

        let actor = Self {
            session_id,
            meeting,
            participants: participants.into_iter().map(|p| (p.id, p)).collect(),
            receiver,
            cancel_token: cancel_token.clone(),
            votes: VoteCoordinator::new(Arc::clone(&deps.ledger)),
            ledger: deps.ledger,
            signer: deps.signer,
            settings: deps.settings,
            events: events.clone(),
            round: None,
            recent_rounds: VecDeque::with_capacity(RECENT_ROUNDS),
            revision: Revision::initial(),
            metrics: deps.metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            session_id,
            owner,
            sender,
            events,
            mailbox,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rv.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            participants = self.participants.len(),
            "SessionActor started"
        );

        let mut last_activity = Instant::now();

        loop {
            let deadline = self.round.as_ref().map(ActiveRound::next_deadline);
            let idle_at = self
                .round
                .is_none()
                .then(|| last_activity + self.settings.idle_timeout);

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rv.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    if self.round.is_some() {
                        self.cancel_round(RoundEnding::Cancelled, "The service is shutting down");
                    }
                    break;
                }

                () = sleep_until(deadline) => {
                    self.on_deadline(Instant::now());
                }

                () = sleep_until(idle_at) => {
                    let subscribers = self.events.receiver_count();
                    if subscribers > 0 {
                        last_activity = Instant::now();
                        continue;
                    }
                    info!(
                        target: "rv.actor.session",
                        session_id = %self.session_id,
                        idle_secs = self.settings.idle_timeout.as_secs(),
                        "SessionActor idle, exiting"
                    );
                    self.close_mailbox().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            last_activity = Instant::now();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rv.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        if self.round.take().is_some() {
            self.metrics.round_closed();
        }
        self.metrics.session_stopped();

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            epoch = self.revision.epoch,
            revision = self.revision.seq,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Stop taking mail, then answer what was queued before the close.
    async fn close_mailbox(&mut self) {
        self.receiver.close();
        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message).await;
            self.mailbox.record_dequeue();
            self.metrics.record_message_processed();
        }
        if self.round.is_some() {
            self.cancel_round(RoundEnding::Cancelled, "The session went idle");
        }
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                display_name,
                respond_to,
            } => {
                let result = self.handle_join(display_name).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Rename {
                participant_id,
                display_name,
                respond_to,
            } => {
                let result = self.handle_rename(participant_id, display_name).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Complete {
                requester,
                respond_to,
            } => {
                let result = self.handle_complete(requester).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AddCandidate {
                requester,
                draft,
                respond_to,
            } => {
                let result = self.handle_add_candidate(requester, draft).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::RemoveCandidate {
                requester,
                candidate_id,
                respond_to,
            } => {
                let result = self.handle_remove_candidate(requester, candidate_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleVote {
                participant_id,
                candidate_id,
                respond_to,
            } => {
                let result = self.handle_toggle_vote(participant_id, candidate_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Leaders { respond_to } => {
                let result = self.votes.winning_candidates(self.session_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ConfirmWinner {
                requester,
                candidate_id,
                respond_to,
            } => {
                let result = self.handle_confirm_winner(requester, candidate_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StartRound {
                requester,
                mechanic,
                respond_to,
            } => {
                let result = self.handle_start_round(requester, mechanic).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::RecordResult {
                requester,
                round_id,
                lease_token,
                claimed_winner,
                respond_to,
            } => {
                let result = self
                    .handle_record_result(requester, round_id, &lease_token, claimed_winner)
                    .await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AbortRound {
                requester,
                round_id,
                respond_to,
            } => {
                let result = self.handle_abort_round(requester, round_id);
                let _ = respond_to.send(result);
            }

            SessionMessage::SubmitAnswer {
                participant_id,
                round_id,
                question_index,
                choice,
                respond_to,
            } => {
                let result =
                    self.handle_submit_answer(participant_id, round_id, question_index, choice);
                let _ = respond_to.send(result);
            }

            SessionMessage::SubmitStop {
                participant_id,
                round_id,
                stop_ms,
                respond_to,
            } => {
                let result = self.handle_submit_stop(participant_id, round_id, stop_ms);
                let _ = respond_to.send(result);
            }

            SessionMessage::Reconcile { respond_to } => {
                let result = self.reconcile().await;
                let _ = respond_to.send(result);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Participants and meeting
    // ------------------------------------------------------------------------

    async fn handle_join(&mut self, display_name: String) -> Result<Participant, RvError> {
        let display_name = validate_display_name(&display_name).map_err(RvError::BadRequest)?;
        let participant = Participant {
            id: ParticipantId::new(),
            display_name,
            joined_at: Utc::now(),
        };
        self.ledger
            .upsert_participant(self.session_id, &participant)
            .await?;
        self.participants.insert(participant.id, participant.clone());

        let expected_players = self.participants.len();
        if let Some(RoundPlay::Quiz(quiz)) = self.round.as_mut().map(|r| &mut r.play) {
            quiz.set_expected_players(expected_players);
        }

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            participant_id = %participant.id,
            participants = self.participants.len(),
            "Participant joined"
        );

        let updated = participant.clone();
        self.emit(|session_id, revision| SessionEvent::ParticipantUpdated {
            session_id,
            revision,
            participant: updated,
        });
        Ok(participant)
    }

    async fn handle_rename(
        &mut self,
        participant_id: ParticipantId,
        display_name: String,
    ) -> Result<Participant, RvError> {
        let mut participant = self.participant(participant_id)?.clone();
        participant.display_name =
            validate_display_name(&display_name).map_err(RvError::BadRequest)?;

        self.ledger
            .upsert_participant(self.session_id, &participant)
            .await?;
        self.participants.insert(participant.id, participant.clone());

        let updated = participant.clone();
        self.emit(|session_id, revision| SessionEvent::ParticipantUpdated {
            session_id,
            revision,
            participant: updated,
        });
        Ok(participant)
    }

    async fn handle_complete(&mut self, requester: ParticipantId) -> Result<Meeting, RvError> {
        if requester != self.meeting.owner {
            return Err(RvError::owner_only("complete the session"));
        }
        if self.meeting.status == MeetingStatus::Completed {
            return Err(RvError::InvalidState(
                "Session is already completed".to_string(),
            ));
        }

        self.ledger
            .set_meeting_status(self.session_id, MeetingStatus::Completed)
            .await?;
        self.meeting.status = MeetingStatus::Completed;

        if self.round.is_some() {
            self.cancel_round(RoundEnding::Cancelled, "The session was completed");
        }

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            "Session completed"
        );
        self.emit(|session_id, revision| SessionEvent::SessionCompleted {
            session_id,
            revision,
        });
        Ok(self.meeting.clone())
    }

    // ------------------------------------------------------------------------
    // Candidates and votes
    // ------------------------------------------------------------------------

    async fn handle_add_candidate(
        &mut self,
        requester: ParticipantId,
        draft: CandidateDraft,
    ) -> Result<Candidate, RvError> {
        self.participant(requester)?;
        self.ensure_planning()?;

        let candidate = draft
            .validated()
            .map_err(RvError::BadRequest)?
            .into_candidate(self.session_id, requester);
        self.ledger.put_candidate(&candidate).await?;

        debug!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            candidate_id = %candidate.id,
            origin = candidate.origin.as_str(),
            "Candidate added"
        );

        let added = candidate.clone();
        self.emit(|session_id, revision| SessionEvent::CandidateAdded {
            session_id,
            revision,
            candidate: added,
        });
        Ok(candidate)
    }

    async fn handle_remove_candidate(
        &mut self,
        requester: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<CandidateRemoval, RvError> {
        self.participant(requester)?;
        self.ensure_planning()?;

        let removal = self
            .ledger
            .remove_candidate(self.session_id, candidate_id, requester)
            .await?;

        if self.round.as_ref().is_some_and(|r| r.contains(candidate_id)) {
            self.cancel_round(RoundEnding::Cancelled, POOL_CHANGED);
        }

        let tally = self.votes.tally(self.session_id).await?;
        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            candidate_id = %candidate_id,
            removed_votes = removal.removed_votes,
            "Candidate removed"
        );

        let removed_votes = removal.removed_votes;
        self.emit(|session_id, revision| SessionEvent::CandidateRemoved {
            session_id,
            revision,
            candidate_id,
            removed_votes,
            tally,
        });
        Ok(removal)
    }

    async fn handle_toggle_vote(
        &mut self,
        participant_id: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<VoteToggle, RvError> {
        self.participant(participant_id)?;
        self.ensure_planning()?;

        let toggle = self
            .votes
            .cast_or_retract_vote(self.session_id, participant_id, candidate_id)
            .await?;
        metrics::record_vote(toggle.cast);

        let tally = toggle.tally.clone();
        self.emit(|session_id, revision| SessionEvent::TallyUpdated {
            session_id,
            revision,
            tally,
        });
        Ok(toggle)
    }

    async fn handle_confirm_winner(
        &mut self,
        requester: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<SelectionEvent, RvError> {
        if requester != self.meeting.owner {
            return Err(RvError::owner_only("confirm a winner"));
        }
        self.ensure_planning()?;
        if self.round.is_some() {
            return Err(RvError::Conflict("A round is in progress".to_string()));
        }

        let tally = self.votes.tally(self.session_id).await?;
        if tally.total_votes() == 0 {
            return Err(RvError::InvalidState("No votes yet".to_string()));
        }
        let leaders = tally.leaders();
        if !leaders.contains(&candidate_id) {
            return Err(RvError::Conflict(
                "Candidate is not among the leaders".to_string(),
            ));
        }

        let selection = self
            .ledger
            .append_selection_event(NewSelectionEvent {
                session_id: self.session_id,
                mechanic: Mechanic::ManualTiebreak,
                winning_candidate_id: candidate_id,
                round_id: None,
                recorded_by: requester,
                recorded_at: Utc::now(),
                payload: SelectionPayload::ManualTiebreak { tied: leaders },
            })
            .await?;
        metrics::record_selection(Mechanic::ManualTiebreak.as_str());

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            winner = %candidate_id,
            sequence = selection.sequence,
            "Tie-break confirmed"
        );

        let recorded = selection.clone();
        self.emit(|session_id, revision| SessionEvent::RoundResult {
            session_id,
            revision,
            mechanic: Mechanic::ManualTiebreak,
            selection: recorded,
        });
        Ok(selection)
    }

    // ------------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------------

    async fn handle_start_round(
        &mut self,
        requester: ParticipantId,
        mechanic: Mechanic,
    ) -> Result<(RoundView, RoundLease), RvError> {
        self.participant(requester)?;
        self.ensure_planning()?;
        if self.round.is_some() {
            return Err(RvError::Conflict(
                "Another round is in progress".to_string(),
            ));
        }

        let candidates = self.ledger.list_candidates(self.session_id).await?;
        if candidates.is_empty() {
            return Err(RvError::no_candidates());
        }

        let now = Instant::now();
        let round_id = RoundId::new();
        let mut ctx = RoundContext::random();
        let play = RoundPlay::new(
            mechanic,
            &candidates,
            &mut ctx,
            self.participants.len(),
            self.settings.question_window,
            self.settings.duel_grace,
            now,
        )?;

        let ttl = play.expected_duration(self.settings.question_window, now)
            + self.settings.result_lease;
        let lease = self
            .signer
            .issue_lease(self.session_id, round_id, requester, ttl)?;

        let mut round = ActiveRound {
            round_id,
            mechanic,
            owner: requester,
            phase: RoundPhase::Starting,
            candidates: candidates.iter().map(|c| c.id).collect(),
            ctx,
            play,
            outcome: None,
            started_at: Utc::now(),
            opened_at: now,
            lease: lease.clone(),
            lease_deadline: now + ttl,
        };
        round.begin()?;

        let view = round.view(now);
        self.round = Some(round);
        self.metrics.round_opened();
        metrics::record_round_started(mechanic.as_str());

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            round_id = %round_id,
            mechanic = mechanic.as_str(),
            owner = %requester,
            seed = view_seed(&view),
            "Round started"
        );

        let started = view.clone();
        self.emit(|session_id, revision| SessionEvent::RoundStarted {
            session_id,
            revision,
            mechanic,
            round: started,
        });
        Ok((view, lease))
    }

    async fn handle_record_result(
        &mut self,
        requester: ParticipantId,
        round_id: RoundId,
        lease_token: &str,
        claimed_winner: Option<CandidateId>,
    ) -> Result<SelectionEvent, RvError> {
        let (owner, mechanic, phase, lease_deadline, outcome) = {
            let round = self.round_by_id(round_id)?;
            (
                round.owner,
                round.mechanic,
                round.phase,
                round.lease_deadline,
                round.outcome.clone(),
            )
        };

        if requester != owner {
            return Err(RvError::Forbidden(
                "Only the round owner can record the result".to_string(),
            ));
        }

        if Instant::now() >= lease_deadline {
            self.cancel_round(RoundEnding::Expired, LEASE_EXPIRED);
            return Err(lease_timeout());
        }
        match self
            .signer
            .verify_lease(self.session_id, round_id, requester, lease_token, Utc::now())
        {
            Ok(_) => {}
            Err(TokenError::Expired) => {
                self.cancel_round(RoundEnding::Expired, LEASE_EXPIRED);
                return Err(lease_timeout());
            }
            Err(e) => {
                debug!(
                    target: "rv.actor.session",
                    session_id = %self.session_id,
                    round_id = %round_id,
                    error = %e,
                    "Round lease rejected"
                );
                return Err(RvError::Forbidden("Invalid round lease".to_string()));
            }
        }

        let outcome = match (phase, outcome) {
            (RoundPhase::Finishing, Some(outcome)) => outcome,
            _ => {
                return Err(RvError::InvalidState(
                    "The round is still running".to_string(),
                ))
            }
        };
        if claimed_winner.is_some_and(|claimed| claimed != outcome.winner) {
            return Err(RvError::Conflict(
                "Claimed winner does not match the round outcome".to_string(),
            ));
        }

        let selection = self
            .ledger
            .append_selection_event(NewSelectionEvent {
                session_id: self.session_id,
                mechanic,
                winning_candidate_id: outcome.winner,
                round_id: Some(round_id),
                recorded_by: requester,
                recorded_at: Utc::now(),
                payload: outcome.payload,
            })
            .await?;

        if let Some(round) = self.round.take() {
            self.close_round(&round, RoundEnding::Recorded);
        }
        metrics::record_selection(mechanic.as_str());

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            round_id = %round_id,
            mechanic = mechanic.as_str(),
            winner = %selection.winning_candidate_id,
            sequence = selection.sequence,
            "Round result recorded"
        );

        let recorded = selection.clone();
        self.emit(|session_id, revision| SessionEvent::RoundResult {
            session_id,
            revision,
            mechanic,
            selection: recorded,
        });
        Ok(selection)
    }

    fn handle_abort_round(
        &mut self,
        requester: ParticipantId,
        round_id: RoundId,
    ) -> Result<(), RvError> {
        if self.round_by_id(round_id)?.owner != requester {
            return Err(RvError::Forbidden(
                "Only the round owner can abort the round".to_string(),
            ));
        }
        self.cancel_round(RoundEnding::Aborted, "Aborted by the round owner");
        Ok(())
    }

    fn handle_submit_answer(
        &mut self,
        participant_id: ParticipantId,
        round_id: RoundId,
        question_index: usize,
        choice: usize,
    ) -> Result<AnswerReceipt, RvError> {
        self.participant(participant_id)?;
        let now = Instant::now();

        let round = match self.round.as_mut() {
            Some(round) if round.round_id == round_id => round,
            _ => return Err(round_error(&self.recent_rounds, round_id)),
        };
        let running = round.phase == RoundPhase::Running;
        let RoundPlay::Quiz(quiz) = &mut round.play else {
            return Err(RvError::BadRequest(
                "This round is not a speed quiz".to_string(),
            ));
        };
        if !running {
            return Err(MechanicError::Closed("The quiz is over".to_string()).into());
        }

        let scored = quiz.submit(participant_id, question_index, choice, now)?;
        let answers = quiz.total_answers();
        let everyone_answered = quiz.all_answered();
        let mechanic = round.mechanic;

        self.emit(|session_id, revision| SessionEvent::RoundProgress {
            session_id,
            revision,
            round_id,
            mechanic,
            progress: RoundProgress::AnswerReceived {
                question_index,
                participant_id,
                answers,
            },
        });
        if everyone_answered {
            self.advance_quiz(now);
        }

        Ok(AnswerReceipt {
            round_id,
            question_index,
            correct: scored.correct,
            points: scored.points,
            elapsed_ms: scored.elapsed_ms,
        })
    }

    fn handle_submit_stop(
        &mut self,
        participant_id: ParticipantId,
        round_id: RoundId,
        stop_ms: u64,
    ) -> Result<StopReceipt, RvError> {
        self.participant(participant_id)?;
        let now = Instant::now();
        let players = self.participants.len();

        let round = match self.round.as_mut() {
            Some(round) if round.round_id == round_id => round,
            _ => return Err(round_error(&self.recent_rounds, round_id)),
        };
        let running = round.phase == RoundPhase::Running;
        let RoundPlay::Duel(duel) = &mut round.play else {
            return Err(RvError::BadRequest(
                "This round is not a timing duel".to_string(),
            ));
        };
        if !running {
            return Err(MechanicError::Closed("The duel is over".to_string()).into());
        }

        let entry = duel.submit(participant_id, stop_ms, now)?;
        let submitted = duel.entries().len();
        let mechanic = round.mechanic;

        self.emit(|session_id, revision| SessionEvent::RoundProgress {
            session_id,
            revision,
            round_id,
            mechanic,
            progress: RoundProgress::StopSubmitted {
                participant_id,
                submitted,
            },
        });
        if submitted >= players {
            self.finish_round();
        }

        Ok(StopReceipt {
            round_id,
            stop_ms: entry.stop_ms,
            order: entry.order,
        })
    }

    // ------------------------------------------------------------------------
    // Round lifecycle
    // ------------------------------------------------------------------------

    fn on_deadline(&mut self, now: Instant) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        let round_id = round.round_id;

        let action = if now >= round.lease_deadline {
            DeadlineAction::ExpireLease
        } else if round.phase != RoundPhase::Running {
            DeadlineAction::Wait
        } else {
            match &round.play {
                RoundPlay::Quiz(quiz) if quiz.deadline().is_some_and(|d| now >= d) => {
                    DeadlineAction::CloseQuestion
                }
                RoundPlay::Duel(duel) if now >= duel.auto_end_at() => DeadlineAction::EndDuel,
                _ => DeadlineAction::Wait,
            }
        };

        match action {
            DeadlineAction::ExpireLease => {
                warn!(
                    target: "rv.actor.session",
                    session_id = %self.session_id,
                    round_id = %round_id,
                    "Round lease expired"
                );
                self.cancel_round(RoundEnding::Expired, LEASE_EXPIRED);
            }
            DeadlineAction::CloseQuestion => self.advance_quiz(now),
            DeadlineAction::EndDuel => {
                debug!(
                    target: "rv.actor.session",
                    session_id = %self.session_id,
                    round_id = %round_id,
                    "Duel reached auto_end_at"
                );
                self.finish_round();
            }
            DeadlineAction::Wait => {}
        }
    }

    /// Close the current quiz question and open the next, or finish.
    fn advance_quiz(&mut self, now: Instant) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        let RoundPlay::Quiz(quiz) = &mut round.play else {
            return;
        };
        let Some(step) = quiz.advance(now) else {
            return;
        };
        let closes_at = quiz.deadline().map(|d| wall_clock(d, now));
        let (round_id, mechanic) = (round.round_id, round.mechanic);

        self.emit(|session_id, revision| SessionEvent::RoundProgress {
            session_id,
            revision,
            round_id,
            mechanic,
            progress: RoundProgress::QuestionClosed {
                question_index: step.closed_index,
                correct_option: step.correct_option,
            },
        });

        match (step.next, closes_at) {
            (Some(question), Some(closes_at)) => {
                self.emit(|session_id, revision| SessionEvent::RoundProgress {
                    session_id,
                    revision,
                    round_id,
                    mechanic,
                    progress: RoundProgress::QuestionOpened {
                        question,
                        closes_at,
                    },
                });
            }
            _ => self.finish_round(),
        }
    }

    /// Draw the outcome of an interactive round, or cancel it when nobody
    /// played.
    fn finish_round(&mut self) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        let (round_id, mechanic) = (round.round_id, round.mechanic);
        let finished = round.finish().map(Clone::clone);

        match finished {
            Ok(outcome) => {
                debug!(
                    target: "rv.actor.session",
                    session_id = %self.session_id,
                    round_id = %round_id,
                    winner = %outcome.winner,
                    "Round awaiting result"
                );
                self.emit(|session_id, revision| SessionEvent::RoundProgress {
                    session_id,
                    revision,
                    round_id,
                    mechanic,
                    progress: RoundProgress::AwaitingResult { outcome },
                });
            }
            Err(e) => {
                self.cancel_round(RoundEnding::Cancelled, &e.to_string());
            }
        }
    }

    /// End the active round without a result and tell subscribers why.
    fn cancel_round(&mut self, ending: RoundEnding, reason: &str) {
        let Some(round) = self.round.take() else {
            return;
        };
        self.close_round(&round, ending);

        info!(
            target: "rv.actor.session",
            session_id = %self.session_id,
            round_id = %round.round_id,
            mechanic = round.mechanic.as_str(),
            ending = ending.as_str(),
            reason = reason,
            "Round cancelled"
        );

        let (round_id, mechanic) = (round.round_id, round.mechanic);
        let reason = reason.to_string();
        self.emit(|session_id, revision| SessionEvent::RoundCancelled {
            session_id,
            revision,
            round_id,
            mechanic,
            reason,
        });
    }

    fn close_round(&mut self, round: &ActiveRound, ending: RoundEnding) {
        if self.recent_rounds.len() == RECENT_ROUNDS {
            self.recent_rounds.pop_front();
        }
        self.recent_rounds.push_back((round.round_id, ending));
        self.metrics.round_closed();
        metrics::record_round_finished(
            round.mechanic.as_str(),
            ending.as_str(),
            round.opened_at.elapsed(),
        );
    }

    fn round_by_id(&self, round_id: RoundId) -> Result<&ActiveRound, RvError> {
        match self.round.as_ref() {
            Some(round) if round.round_id == round_id => Ok(round),
            _ => Err(round_error(&self.recent_rounds, round_id)),
        }
    }

    // ------------------------------------------------------------------------
    // Reads and helpers
    // ------------------------------------------------------------------------

    async fn reconcile(&self) -> Result<StateSnapshot, RvError> {
        let candidates = self.ledger.list_candidates(self.session_id).await?;
        let tally = self.votes.tally(self.session_id).await?;
        let history: Vec<SelectionEvent> = self
            .ledger
            .list_selection_history(self.session_id)
            .try_collect()
            .await?;

        let pool: Vec<CandidateId> = candidates.iter().map(|c| c.id).collect();
        let fairness = fairness::score(&pool, &history);

        let mut participants: Vec<Participant> = self.participants.values().cloned().collect();
        participants.sort_by_key(|p| p.joined_at);

        Ok(StateSnapshot {
            session_id: self.session_id,
            category: self.meeting.category.clone(),
            status: self.meeting.status,
            owner: self.meeting.owner,
            participants,
            candidates,
            tally,
            latest_selection: history.into_iter().next(),
            fairness,
            active_round: self.round.as_ref().map(|r| r.view(Instant::now())),
            revision: self.revision,
        })
    }

    fn participant(&self, participant_id: ParticipantId) -> Result<&Participant, RvError> {
        self.participants.get(&participant_id).ok_or_else(|| {
            RvError::Forbidden("Not a participant of this session".to_string())
        })
    }

    fn ensure_planning(&self) -> Result<(), RvError> {
        match self.meeting.status {
            MeetingStatus::Planning => Ok(()),
            MeetingStatus::Completed => {
                Err(RvError::InvalidState("Session is completed".to_string()))
            }
        }
    }

    /// Bump the revision and broadcast. A broadcast nobody receives is fine.
    fn emit(&mut self, build: impl FnOnce(SessionId, Revision) -> SessionEvent) {
        self.revision = self.revision.next();
        let event = build(self.session_id, self.revision);
        let kind = event.kind();
        let delivered = match self.events.send(event) {
            Ok(receivers) => {
                debug!(
                    target: "rv.realtime",
                    session_id = %self.session_id,
                    revision = self.revision.seq,
                    event = kind,
                    receivers,
                    "Event broadcast"
                );
                true
            }
            Err(_) => false,
        };
        metrics::record_broadcast(kind, delivered);
    }
}

enum DeadlineAction {
    ExpireLease,
    CloseQuestion,
    EndDuel,
    Wait,
}

fn round_error(recent: &VecDeque<(RoundId, RoundEnding)>, round_id: RoundId) -> RvError {
    let ending = recent
        .iter()
        .find(|(id, _)| *id == round_id)
        .map(|(_, ending)| *ending);
    match ending {
        Some(RoundEnding::Recorded) => {
            RvError::Conflict("Round result was already recorded".to_string())
        }
        Some(RoundEnding::Cancelled | RoundEnding::Aborted) => {
            RvError::Conflict("Round was cancelled".to_string())
        }
        Some(RoundEnding::Expired) => lease_timeout(),
        None => RvError::NotFound("Round not found".to_string()),
    }
}

fn lease_timeout() -> RvError {
    RvError::Timeout("The round lease has expired".to_string())
}

fn view_seed(view: &RoundView) -> Option<u64> {
    match &view.detail {
        super::round::RoundDetail::Instant { outcome: Some(o) } => o.payload.seed(),
        _ => None,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::RoundDetail;
    use crate::ledger::InMemoryLedger;
    use crate::models::CandidateOrigin;
    use std::time::Duration;

    struct Fixture {
        handle: SessionActorHandle,
        ledger: Arc<InMemoryLedger>,
        owner: ParticipantId,
        settings: RoundSettings,
    }

    async fn spawn_session() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = Participant {
            id: ParticipantId::new(),
            display_name: "Owner".to_string(),
            joined_at: Utc::now(),
        };
        let meeting = Meeting {
            id: SessionId::new(),
            category: "cafe".to_string(),
            status: MeetingStatus::Planning,
            owner: owner.id,
            created_at: Utc::now(),
        };
        ledger.create_meeting(&meeting, &owner).await.unwrap();

        let settings = RoundSettings::default();
        let deps = SessionDeps {
            ledger: ledger.clone(),
            signer: Arc::new(TokenSigner::new(vec![7; 32]).unwrap()),
            settings,
            metrics: ActorMetrics::new(),
        };
        let (handle, _task) =
            SessionActor::spawn(meeting, vec![owner.clone()], deps, CancellationToken::new());

        Fixture {
            handle,
            ledger,
            owner: owner.id,
            settings,
        }
    }

    fn draft(name: &str) -> CandidateDraft {
        CandidateDraft {
            name: name.to_string(),
            category: "cafe".to_string(),
            address: format!("1 {name} Street"),
            rating: Some(4.5),
            origin: CandidateOrigin::Manual,
        }
    }

    async fn add(f: &Fixture, name: &str) -> CandidateId {
        f.handle.add_candidate(f.owner, draft(name)).await.unwrap().id
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn cancel_reason(events: &[SessionEvent]) -> Option<String> {
        events.iter().find_map(|e| match e {
            SessionEvent::RoundCancelled { reason, .. } => Some(reason.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_start_round_without_candidates() {
        let f = spawn_session().await;
        let result = f.handle.start_round(f.owner, Mechanic::Roulette).await;
        assert_eq!(result.unwrap_err(), RvError::no_candidates());
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_start_round_admits_one() {
        let f = spawn_session().await;
        add(&f, "A").await;
        add(&f, "B").await;
        let guest = f.handle.join("Guest".to_string()).await.unwrap().id;

        let (first, second) = tokio::join!(
            f.handle.start_round(f.owner, Mechanic::TimingDuel),
            f.handle.start_round(guest, Mechanic::SpeedQuiz),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(RvError::Conflict(_)))));
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_dice_round_recorded_once() {
        let f = spawn_session().await;
        add(&f, "A").await;
        add(&f, "B").await;
        let mut events = f.handle.subscribe();

        let (view, lease) = f.handle.start_round(f.owner, Mechanic::Dice).await.unwrap();
        assert_eq!(view.phase, RoundPhase::Finishing);
        let winner = match &view.detail {
            RoundDetail::Instant { outcome: Some(o) } => Some(o.winner),
            _ => None,
        }
        .expect("dice outcome is drawn at start");

        let selection = f
            .handle
            .record_result(f.owner, view.round_id, lease.token.clone(), Some(winner))
            .await
            .unwrap();
        assert_eq!(selection.mechanic, Mechanic::Dice);
        assert_eq!(selection.winning_candidate_id, winner);
        assert_eq!(selection.round_id, Some(view.round_id));

        let again = f
            .handle
            .record_result(f.owner, view.round_id, lease.token, None)
            .await;
        assert!(matches!(again, Err(RvError::Conflict(_))));

        let kinds: Vec<&str> = drain(&mut events).iter().map(SessionEvent::kind).collect();
        assert_eq!(kinds, vec!["round-started", "round-result"]);
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_record_result_checks_owner_lease_and_claim() {
        let f = spawn_session().await;
        let a = add(&f, "A").await;
        let b = add(&f, "B").await;
        let guest = f.handle.join("Guest".to_string()).await.unwrap().id;

        let (view, lease) = f
            .handle
            .start_round(f.owner, Mechanic::Roulette)
            .await
            .unwrap();

        let by_guest = f
            .handle
            .record_result(guest, view.round_id, lease.token.clone(), None)
            .await;
        assert!(matches!(by_guest, Err(RvError::Forbidden(_))));

        let forged = f
            .handle
            .record_result(f.owner, view.round_id, "123.abcd".to_string(), None)
            .await;
        assert!(matches!(forged, Err(RvError::Forbidden(_))));

        let unknown = f
            .handle
            .record_result(f.owner, RoundId::new(), lease.token.clone(), None)
            .await;
        assert!(matches!(unknown, Err(RvError::NotFound(_))));

        let snapshot = f.handle.reconcile().await.unwrap();
        let outcome = match snapshot.active_round.map(|r| r.detail) {
            Some(RoundDetail::Instant { outcome: Some(o) }) => Some(o),
            _ => None,
        }
        .unwrap();
        let wrong = if outcome.winner == a { b } else { a };
        let mismatch = f
            .handle
            .record_result(f.owner, view.round_id, lease.token, Some(wrong))
            .await;
        assert!(matches!(mismatch, Err(RvError::Conflict(_))));
        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiz_question_auto_advances() {
        let f = spawn_session().await;
        add(&f, "A").await;
        add(&f, "B").await;
        let mut events = f.handle.subscribe();

        let (view, _lease) = f
            .handle
            .start_round(f.owner, Mechanic::SpeedQuiz)
            .await
            .unwrap();
        assert_eq!(view.phase, RoundPhase::Running);

        tokio::time::advance(f.settings.question_window + Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = f.handle.reconcile().await.unwrap();
        let question = match snapshot.active_round.map(|r| r.detail) {
            Some(RoundDetail::SpeedQuiz { question, .. }) => question,
            _ => None,
        }
        .unwrap();
        assert_eq!(question.index, 1);

        // Nobody answered either question.
        tokio::time::advance(f.settings.question_window).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = drain(&mut events);
        assert_eq!(
            cancel_reason(&events).as_deref(),
            Some("No quiz answers were submitted")
        );
        assert!(f.handle.reconcile().await.unwrap().active_round.is_none());
        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiz_advances_when_everyone_answered() {
        let f = spawn_session().await;
        add(&f, "A").await;
        add(&f, "B").await;

        let (view, _lease) = f
            .handle
            .start_round(f.owner, Mechanic::SpeedQuiz)
            .await
            .unwrap();

        let receipt = f
            .handle
            .submit_answer(f.owner, view.round_id, 0, 0)
            .await
            .unwrap();
        assert_eq!(receipt.question_index, 0);

        let again = f.handle.submit_answer(f.owner, view.round_id, 0, 1).await;
        assert!(matches!(again, Err(RvError::Conflict(_))));

        let snapshot = f.handle.reconcile().await.unwrap();
        assert!(matches!(
            snapshot.active_round.map(|r| r.detail),
            Some(RoundDetail::SpeedQuiz { question: Some(q), answers: 1, .. }) if q.index == 1
        ));
        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duel_force_finishes_at_auto_end() {
        let f = spawn_session().await;
        add(&f, "A").await;
        add(&f, "B").await;
        f.handle.join("Guest".to_string()).await.unwrap();
        let mut events = f.handle.subscribe();

        let (view, lease) = f
            .handle
            .start_round(f.owner, Mechanic::TimingDuel)
            .await
            .unwrap();
        let target_ms = match view.detail {
            RoundDetail::TimingDuel { target_ms, .. } => Some(target_ms),
            _ => None,
        }
        .unwrap();

        tokio::time::advance(Duration::from_millis(target_ms)).await;
        let stop = f
            .handle
            .submit_stop(f.owner, view.round_id, target_ms)
            .await
            .unwrap();
        assert_eq!(stop.stop_ms, target_ms);

        // The guest never stops; the duel ends on its own.
        tokio::time::advance(f.settings.duel_grace).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = f.handle.reconcile().await.unwrap();
        let round = snapshot.active_round.unwrap();
        assert_eq!(round.phase, RoundPhase::Finishing);

        let late = f.handle.submit_stop(f.owner, view.round_id, 10).await;
        assert!(matches!(late, Err(RvError::Conflict(_))));

        let selection = f
            .handle
            .record_result(f.owner, view.round_id, lease.token, None)
            .await
            .unwrap();
        assert!(matches!(
            selection.payload,
            SelectionPayload::TimingDuel(ref summary) if summary.duel_winner == f.owner
        ));
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            SessionEvent::RoundProgress {
                progress: RoundProgress::AwaitingResult { .. },
                ..
            }
        )));
        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duel_without_stops_is_cancelled() {
        let f = spawn_session().await;
        add(&f, "A").await;
        let mut events = f.handle.subscribe();

        let (view, _lease) = f
            .handle
            .start_round(f.owner, Mechanic::TimingDuel)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(13)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            cancel_reason(&drain(&mut events)).as_deref(),
            Some("No one stopped the clock before the deadline")
        );
        let late = f.handle.abort_round(f.owner, view.round_id).await;
        assert!(matches!(late, Err(RvError::Conflict(_))));
        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_cancels_round() {
        let f = spawn_session().await;
        add(&f, "A").await;
        add(&f, "B").await;
        let mut events = f.handle.subscribe();

        let (view, lease) = f
            .handle
            .start_round(f.owner, Mechanic::Roulette)
            .await
            .unwrap();

        tokio::time::advance(f.settings.result_lease + Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cancel_reason(&drain(&mut events)).as_deref(), Some(LEASE_EXPIRED));
        let late = f
            .handle
            .record_result(f.owner, view.round_id, lease.token, None)
            .await;
        assert!(matches!(late, Err(RvError::Timeout(_))));

        // The session is free for the next round.
        assert!(f.handle.start_round(f.owner, Mechanic::Dice).await.is_ok());
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_removing_snapshot_candidate_cancels_round() {
        let f = spawn_session().await;
        let a = add(&f, "A").await;
        add(&f, "B").await;
        let mut events = f.handle.subscribe();

        f.handle
            .start_round(f.owner, Mechanic::TimingDuel)
            .await
            .unwrap();
        f.handle.remove_candidate(f.owner, a).await.unwrap();

        let events = drain(&mut events);
        assert_eq!(cancel_reason(&events).as_deref(), Some(POOL_CHANGED));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::CandidateRemoved { candidate_id, .. }) if *candidate_id == a
        ));
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_tied_leaders_confirmed_by_owner() {
        let f = spawn_session().await;
        let a = add(&f, "A").await;
        let b = add(&f, "B").await;
        let c = add(&f, "C").await;

        let g1 = f.handle.join("G1".to_string()).await.unwrap().id;
        let g2 = f.handle.join("G2".to_string()).await.unwrap().id;
        let g3 = f.handle.join("G3".to_string()).await.unwrap().id;
        for (voter, candidate) in [(f.owner, a), (g1, a), (g2, b), (g3, b)] {
            f.handle.toggle_vote(voter, candidate).await.unwrap();
        }

        assert_eq!(f.handle.leaders().await.unwrap(), vec![a, b]);

        let by_guest = f.handle.confirm_winner(g1, b).await;
        assert!(matches!(by_guest, Err(RvError::Forbidden(_))));
        let not_leader = f.handle.confirm_winner(f.owner, c).await;
        assert!(matches!(not_leader, Err(RvError::Conflict(_))));

        let selection = f.handle.confirm_winner(f.owner, b).await.unwrap();
        assert_eq!(selection.mechanic, Mechanic::ManualTiebreak);
        assert_eq!(selection.winning_candidate_id, b);
        assert_eq!(
            selection.payload,
            SelectionPayload::ManualTiebreak { tied: vec![a, b] }
        );

        let snapshot = f.handle.reconcile().await.unwrap();
        assert_eq!(snapshot.latest_selection, Some(selection));
        assert_eq!(snapshot.fairness.total_selections, 1);
        assert_eq!(snapshot.fairness.overall_index, 100.0);
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_confirm_without_votes() {
        let f = spawn_session().await;
        let a = add(&f, "A").await;
        let result = f.handle.confirm_winner(f.owner, a).await;
        assert_eq!(
            result.unwrap_err(),
            RvError::InvalidState("No votes yet".to_string())
        );
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_revision_increments_per_event() {
        let f = spawn_session().await;
        let mut events = f.handle.subscribe();

        let a = add(&f, "A").await;
        f.handle.toggle_vote(f.owner, a).await.unwrap();
        f.handle.toggle_vote(f.owner, a).await.unwrap();

        let revisions: Vec<Revision> = drain(&mut events)
            .iter()
            .filter_map(SessionEvent::revision)
            .collect();
        let seqs: Vec<u64> = revisions.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(revisions.iter().all(|r| r.epoch == revisions.first().unwrap().epoch));

        let snapshot = f.handle.reconcile().await.unwrap();
        assert_eq!(Some(&snapshot.revision), revisions.last());
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_completed_session_rejects_changes() {
        let f = spawn_session().await;
        let a = add(&f, "A").await;
        let guest = f.handle.join("Guest".to_string()).await.unwrap().id;

        let by_guest = f.handle.complete(guest).await;
        assert!(matches!(by_guest, Err(RvError::Forbidden(_))));

        let meeting = f.handle.complete(f.owner).await.unwrap();
        assert_eq!(meeting.status, MeetingStatus::Completed);
        let stored = f.ledger.get_meeting(meeting.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MeetingStatus::Completed);

        for result in [
            f.handle.toggle_vote(guest, a).await.map(|_| ()),
            f.handle.add_candidate(guest, draft("B")).await.map(|_| ()),
            f.handle
                .start_round(f.owner, Mechanic::Dice)
                .await
                .map(|_| ()),
        ] {
            assert!(matches!(result, Err(RvError::InvalidState(_))));
        }
        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_unknown_participant_is_forbidden() {
        let f = spawn_session().await;
        let result = f
            .handle
            .add_candidate(ParticipantId::new(), draft("A"))
            .await;
        assert!(matches!(result, Err(RvError::Forbidden(_))));
        f.handle.cancel();
    }
}
