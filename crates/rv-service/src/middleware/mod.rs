//! Middleware for the Rendezvous gateway.
//!
//! # Components
//!
//! - `auth` - Participant token middleware for session routes
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{require_participant, AuthState};
pub use http_metrics::http_metrics_middleware;
