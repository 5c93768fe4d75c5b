//! Realtime broadcast layer.
//!
//! Each `SessionActor` owns a bounded `tokio::sync::broadcast` channel of
//! [`SessionEvent`]s. The WebSocket handler forwards them as JSON text
//! frames; a subscriber that falls behind the buffer gets a
//! `resync-required` frame instead of the events it missed. Clients merge
//! events and `GET /state` snapshots through [`SessionView`].

pub mod events;
pub mod view;

pub use events::{Revision, RoundProgress, SessionEvent};
pub use view::{ApplyOutcome, SessionView};
