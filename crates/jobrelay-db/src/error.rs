//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The row is not in a state that allows the requested transition.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<jobrelay_core::Error> for DbError {
    fn from(err: jobrelay_core::Error) -> Self {
        match err {
            jobrelay_core::Error::NotFound(msg) => DbError::NotFound(msg),
            jobrelay_core::Error::Conflict(msg) => DbError::Conflict(msg),
            jobrelay_core::Error::Validation(msg) => DbError::Validation(msg),
            other => DbError::InvalidData(other.to_string()),
        }
    }
}

impl From<DbError> for jobrelay_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => jobrelay_core::Error::NotFound(msg),
            DbError::Conflict(msg) => jobrelay_core::Error::Conflict(msg),
            DbError::Validation(msg) => jobrelay_core::Error::Validation(msg),
            DbError::InvalidData(msg) => jobrelay_core::Error::Internal(msg),
            DbError::Database(e) => jobrelay_core::Error::Persistence(e.to_string()),
            DbError::Migration(e) => jobrelay_core::Error::Persistence(e.to_string()),
        }
    }
}
