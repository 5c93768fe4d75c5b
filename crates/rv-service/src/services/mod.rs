//! Service layer for Rendezvous.
//!
//! # Components
//!
//! - `fairness` - Fairness index over the selection history
//! - `votes` - Vote toggling, tallies and tied leaders

pub mod fairness;
pub mod votes;

pub use fairness::{CandidateFairness, FairnessReport};
pub use votes::VoteCoordinator;
