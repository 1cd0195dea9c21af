//! Core domain types and traits for the jobrelay orchestrator.
//!
//! This crate contains:
//! - Resource identifiers
//! - Job and worker records with their closed status enums
//! - Submission validation
//! - Retry decision and worker-side backoff
//! - The job execution trait implemented by executors
//! - A clock abstraction so stores can be driven by tests

pub mod backoff;
pub mod clock;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod retry;
pub mod worker;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use id::ResourceId;
pub use job::{
    ClaimedJob, Job, JobOutcome, JobStatus, JobSummary, NewJob, OutcomeDecision, OutcomeReport,
};
pub use retry::RetryDecision;
pub use worker::{Worker, WorkerStatus};
