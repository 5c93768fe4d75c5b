//! Common data types for Rendezvous components.
//!
//! Every identifier is a UUID newtype so a `CandidateId` can never be passed
//! where a `ParticipantId` is expected. All of them serialize as plain UUID
//! strings.

use crate::error::RendezvousError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[doc = concat!("Create a new random ", $label, " ID")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the wrapped UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = RendezvousError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| RendezvousError::InvalidId(format!("{} id", $label)))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a planning session (meeting)
    SessionId,
    "session"
);

uuid_id!(
    /// Unique identifier for a participant within a session
    ParticipantId,
    "participant"
);

uuid_id!(
    /// Unique identifier for a candidate place
    CandidateId,
    "candidate"
);

uuid_id!(
    /// Unique identifier for one selection round
    RoundId,
    "round"
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(CandidateId::new(), CandidateId::new());
    }

    #[test]
    fn test_display_and_parse_agree() {
        let id = ParticipantId::new();
        let parsed: ParticipantId = id.to_string().parse().expect("valid uuid");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = "not-a-uuid".parse::<RoundId>();
        assert_eq!(
            result,
            Err(RendezvousError::InvalidId("round id".to_string()))
        );
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = CandidateId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
    }
}
