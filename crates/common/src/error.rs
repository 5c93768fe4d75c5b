//! Common error types for Rendezvous components.

use thiserror::Error;

/// Errors shared by every Rendezvous crate.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RendezvousError {
    /// An identifier could not be parsed.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using `RendezvousError`
pub type Result<T> = std::result::Result<T, RendezvousError>;
