//! # Rendezvous Test Utilities
//!
//! Shared test utilities for the Rendezvous service.
//!
//! This crate provides:
//! - Server test harness (`TestRvServer` for E2E tests)
//! - Session fixtures (`TestSession`, `TestParticipant`) that drive the REST
//!   API the way a client would
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rv_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRvServer::spawn().await?;
//!     let session = TestSession::create(&server, "cafe", "Alice").await?;
//!
//!     let response = session
//!         .owner
//!         .get(&server, &format!("/api/v1/sessions/{}/state", session.id))
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
