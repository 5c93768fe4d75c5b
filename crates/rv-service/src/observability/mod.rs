//! Observability module for Rendezvous.
//!
//! Provides metrics definitions and instrumentation helpers.

pub mod metrics;
