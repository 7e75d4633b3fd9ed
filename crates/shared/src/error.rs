//! Error taxonomy shared across every crate boundary.
//!
//! Mirrors the kind-based taxonomy from the design doc: each crate that
//! crosses a process boundary maps its own `thiserror::Error` enum onto one
//! of these [`ErrorKind`] values via a `kind()` method, and reuses [`Error`]
//! directly for anything that doesn't need a richer shape.

use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy kinds, independent of any one crate's concrete error type.
/// Every crate-local error enum exposes a `kind()` method mapping onto one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    AuthFailure,
    RateLimited,
    UpstreamUnavailable,
    ArtifactTooLarge,
    ArtifactExpired,
    ParseError,
    StoreConflict,
    InternalError,
}

impl ErrorKind {
    /// Whether a job carrying this error should be retried at all. The
    /// per-attempt policy (backoff, wait-for-reset) lives with the caller.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::UpstreamUnavailable
                | ErrorKind::StoreConflict
                | ErrorKind::InternalError
        )
    }
}

/// Shared application error type
#[derive(Debug, Error)]
pub enum Error {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a NotFound error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a Validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a Config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an Authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map onto the shared taxonomy. A unique-constraint violation maps to
    /// `StoreConflict`; every other database error is `InternalError`,
    /// since connectivity loss is not one of the caller's recoverable kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                ErrorKind::StoreConflict
            }
            Error::Database(_) => ErrorKind::InternalError,
            Error::Config(_) => ErrorKind::InternalError,
            Error::Validation(_) => ErrorKind::BadRequest,
            Error::NotFound { .. } => ErrorKind::BadRequest,
            Error::Authentication(_) => ErrorKind::AuthFailure,
            Error::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        assert_eq!(Error::validation("bad").kind(), ErrorKind::BadRequest);
        assert!(!Error::validation("bad").is_retryable());
    }

    #[test]
    fn internal_is_retryable() {
        assert!(ErrorKind::InternalError.is_retryable());
        assert!(!ErrorKind::BadRequest.is_retryable());
    }
}
