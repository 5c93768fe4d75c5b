//! Actor model for the session engine.
//!
//! ```text
//! SessionRegistry (singleton)
//! └── supervises N SessionActors
//!     └── SessionActor (one per meeting)
//!         ├── owns participants and the active round
//!         └── fans out SessionEvents over a broadcast channel
//! ```
//!
//! # Key Design Decisions
//!
//! - **One writer per meeting**: every mutation for a meeting goes through its
//!   actor, so the one-active-round rule needs no locks
//! - **CancellationToken propagation**: the registry hands child tokens to
//!   session actors for graceful shutdown
//! - **Mailbox monitoring**: depth thresholds with metrics (Registry:
//!   200/1000, Session: 64/256)
//!
//! # Modules
//!
//! - [`registry`] - `SessionRegistry` that creates and rehydrates sessions
//! - [`session`] - `SessionActor` per meeting
//! - [`round`] - Active round state machine
//! - [`messages`] - Message and reply types
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod round;
pub mod session;

pub use messages::{
    AnswerReceipt, CreatedSession, RegistryStatus, SessionMessage, StateSnapshot, StopReceipt,
};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::SessionRegistryHandle;
pub use round::{RoundDetail, RoundPhase, RoundView};
pub use session::{SessionActor, SessionActorHandle, SessionDeps};
