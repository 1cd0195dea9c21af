//! HTTP API server for the jobrelay orchestrator.
//!
//! Exposes job submission, inspection and the worker protocol
//! (register, heartbeat, claim, report) as JSON over HTTP.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
