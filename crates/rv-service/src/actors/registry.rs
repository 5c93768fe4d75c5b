//! `SessionRegistry` - singleton supervisor for session actors.
//!
//! - Creates sessions and spawns one `SessionActor` per meeting
//! - Rehydrates actors lazily from the ledger on first access
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On cancellation the registry stops handing out sessions, cancels every
//! session actor (which cancels its active round) and waits up to the drain
//! timeout for each task to finish.

use super::messages::{CreatedSession, RegistryMessage, RegistryStatus};
use super::metrics::{ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle, SessionDeps};
use crate::errors::RvError;
use crate::models::{validate_category, validate_display_name, Meeting, MeetingStatus, Participant};

use chrono::Utc;
use common::types::{ParticipantId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `SessionRegistry`.
#[derive(Clone, Debug)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    mailbox: Arc<MailboxMonitor>,
    cancel_token: CancellationToken,
}

impl SessionRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    ///
    /// `drain_timeout` bounds how long shutdown waits for each session actor.
    #[must_use]
    pub fn new(deps: SessionDeps, drain_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Registry, "registry"));

        let actor = SessionRegistry {
            receiver,
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            accepting: true,
            deps,
            drain_timeout,
            mailbox: Arc::clone(&mailbox),
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            mailbox,
            cancel_token,
        }
    }

    /// Create a meeting whose creator becomes the owner.
    pub async fn create_session(
        &self,
        category: String,
        display_name: String,
    ) -> Result<CreatedSession, RvError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::CreateSession {
            category,
            display_name,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(recv_failed)?
    }

    /// Handle to the session's actor, rehydrating it from the ledger if needed.
    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionActorHandle, RvError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetSession {
            session_id,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(recv_failed)?
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, RvError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;
        rx.await.map_err(recv_failed)
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), RvError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_abandoned();
            error!(
                target: "rv.actor.registry",
                error = %e,
                "Registry channel send failed"
            );
            RvError::Internal
        })
    }

    /// Cancel the registry and every session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Wait until the registry loop has exited.
    pub async fn closed(&self) {
        self.sender.closed().await;
    }
}

fn recv_failed(e: oneshot::error::RecvError) -> RvError {
    error!(
        target: "rv.actor.registry",
        error = %e,
        "Registry response receive failed"
    );
    RvError::Internal
}

/// Internal state for a managed session.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    /// When this actor was spawned (creation or rehydration).
    spawned_at: i64,
}

/// The `SessionRegistry` implementation.
struct SessionRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    sessions: HashMap<SessionId, ManagedSession>,
    accepting: bool,
    deps: SessionDeps,
    drain_timeout: Duration,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionRegistry {
    #[instrument(skip_all, name = "rv.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "rv.actor.registry",
            backend = self.deps.ledger.backend(),
            "SessionRegistry started"
        );

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rv.actor.registry",
                        "SessionRegistry received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.deps.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rv.actor.registry",
                                "SessionRegistry channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rv.actor.registry",
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionRegistry stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateSession {
                category,
                display_name,
                respond_to,
            } => {
                let result = self.create_session(&category, &display_name).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self.get_session(session_id).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
        }
    }

    async fn create_session(
        &mut self,
        category: &str,
        display_name: &str,
    ) -> Result<CreatedSession, RvError> {
        if !self.accepting {
            return Err(RvError::InvalidState(
                "Service is shutting down".to_string(),
            ));
        }

        let category = validate_category(category).map_err(RvError::BadRequest)?;
        let display_name = validate_display_name(display_name).map_err(RvError::BadRequest)?;

        let now = Utc::now();
        let owner = Participant {
            id: ParticipantId::new(),
            display_name,
            joined_at: now,
        };
        let meeting = Meeting {
            id: SessionId::new(),
            category,
            status: MeetingStatus::Planning,
            owner: owner.id,
            created_at: now,
        };
        self.deps.ledger.create_meeting(&meeting, &owner).await?;

        let handle = self.spawn_session(meeting.clone(), vec![owner.clone()]);

        info!(
            target: "rv.actor.registry",
            session_id = %meeting.id,
            category = %meeting.category,
            total_sessions = self.sessions.len(),
            "Session created"
        );

        Ok(CreatedSession {
            handle,
            meeting,
            owner,
        })
    }

    async fn get_session(&mut self, session_id: SessionId) -> Result<SessionActorHandle, RvError> {
        if let Some(managed) = self.sessions.get(&session_id) {
            if !managed.task_handle.is_finished() && !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
        }
        if !self.accepting {
            return Err(RvError::InvalidState(
                "Service is shutting down".to_string(),
            ));
        }

        let meeting = self
            .deps
            .ledger
            .get_meeting(session_id)
            .await?
            .ok_or_else(|| RvError::NotFound("Session not found".to_string()))?;
        let participants = self.deps.ledger.list_participants(session_id).await?;

        debug!(
            target: "rv.actor.registry",
            session_id = %session_id,
            participants = participants.len(),
            "Rehydrating session actor from ledger"
        );

        Ok(self.spawn_session(meeting, participants))
    }

    fn spawn_session(
        &mut self,
        meeting: Meeting,
        participants: Vec<Participant>,
    ) -> SessionActorHandle {
        let session_id = meeting.id;
        let (handle, task_handle) = SessionActor::spawn(
            meeting,
            participants,
            self.deps.clone(),
            self.cancel_token.child_token(),
        );

        if let Some(stale) = self.sessions.insert(
            session_id,
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                spawned_at: Utc::now().timestamp(),
            },
        ) {
            stale.handle.cancel();
        }
        publish_session_gauge(self.sessions.len());

        handle
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            session_count: self.sessions.len(),
            active_rounds: self.deps.metrics.round_count(),
            mailbox_depth: self.mailbox.current_depth(),
            is_shutting_down: !self.accepting,
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rv.actor.registry",
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout(self.drain_timeout, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rv.actor.registry",
                        session_id = %session_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rv.actor.registry",
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rv.actor.registry",
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
        }
        publish_session_gauge(0);

        info!(target: "rv.actor.registry", "Graceful shutdown complete");
    }

    /// Drop actors whose task ended so the next access rehydrates them.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for session_id in finished {
            let Some(managed) = self.sessions.remove(&session_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rv.actor.registry",
                        session_id = %session_id,
                        uptime_secs = Utc::now().timestamp() - managed.spawned_at,
                        "Session actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "rv.actor.registry",
                        session_id = %session_id,
                        error = ?join_error,
                        "Session actor panicked; it will be rehydrated on next access"
                    );
                    self.deps.metrics.record_panic(ActorType::Session);
                }
                Err(_) => {}
            }
        }
        publish_session_gauge(self.sessions.len());
    }
}

fn publish_session_gauge(sessions: usize) {
    crate::observability::metrics::set_active_sessions(sessions);
}
