//! Rendezvous Service Library
//!
//! Collaborative fair-selection engine: a group proposes candidate places,
//! votes, and settles on one through a server-authoritative round (roulette,
//! dice, speed quiz, timing duel) or an owner tie-break. Every selection is
//! appended to an audit ledger that feeds the fairness index.
//!
//! # Modules
//!
//! - `actors` - Session registry and per-meeting session actors
//! - `auth` - Participant tokens and round leases
//! - `config` - Service configuration
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `ledger` - Durable storage (in-memory and PostgreSQL)
//! - `mechanics` - Selection mechanics
//! - `middleware` - Auth and HTTP metrics middleware
//! - `models` - Data models and API types
//! - `observability` - Prometheus metrics
//! - `realtime` - Push events and the client-side session view
//! - `routes` - Router and application state
//! - `services` - Votes and fairness scoring

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod mechanics;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod realtime;
pub mod routes;
pub mod services;
