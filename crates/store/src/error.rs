//! Error taxonomy for C4 (design doc §7).

use shared::error::ErrorKind;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("natural-key conflict persisted after retry: {0}")]
    Conflict(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::UpstreamUnavailable,
            StoreError::Conflict(_) => ErrorKind::StoreConflict,
            StoreError::Database(_) => ErrorKind::InternalError,
        }
    }

    /// Per design doc §4.4/§4.11: database unavailability bubbles up to the
    /// orchestrator for a normal backoff retry; a conflict that survives
    /// the one transparent retry is not retried again by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(err)
        }
        _ if is_unique_violation(&err) => StoreError::Conflict(err),
        _ => StoreError::Database(err),
    }
}
