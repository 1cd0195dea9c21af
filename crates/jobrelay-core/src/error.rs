//! Error types for jobrelay.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed submission, rejected before any state is written.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The requested transition is not allowed from the record's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store unavailable or the atomic unit failed to commit.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Notification channel or remote orchestrator unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a worker should treat this as a passing condition and loop again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Persistence(_) | Error::Timeout(_) | Error::Unavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
