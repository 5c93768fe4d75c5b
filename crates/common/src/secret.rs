//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for the
//! token signing secret and any other key material.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so a
//! struct that derives `Debug` and holds a secret logs safely through `{:?}`
//! and tracing. Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretBox};
//!
//! #[derive(Debug)]
//! struct Signer {
//!     label: String,
//!     key: SecretBox<Vec<u8>>, // Debug shows "[REDACTED]"
//! }
//!
//! let signer = Signer {
//!     label: "participant-tokens".to_string(),
//!     key: SecretBox::new(Box::new(vec![7u8; 32])),
//! };
//!
//! assert!(format!("{signer:?}").contains("REDACTED"));
//! assert_eq!(signer.key.expose_secret().len(), 32);
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
