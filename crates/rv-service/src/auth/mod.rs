//! Participant identity and round ownership.
//!
//! Participants carry a server-issued bearer token binding them to one
//! session. Round owners additionally hold a short-lived lease that
//! authorizes recording the round's result. Both are HMAC-SHA256 tags under
//! a per-session key derived from the master secret with HKDF.

pub mod claims;
pub mod tokens;

pub use claims::ParticipantClaims;
pub use tokens::{RoundLease, TokenError, TokenSigner};
