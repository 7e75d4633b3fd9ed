//! Error taxonomy for C2 (design doc §7).

use shared::error::ErrorKind;
use thiserror::Error;

pub type ArtifactResult<T> = std::result::Result<T, ArtifactReaderError>;

#[derive(Debug, Error)]
pub enum ArtifactReaderError {
    #[error("artifact exceeds size cap: {0}")]
    TooLarge(String),

    #[error("artifact expired or unavailable")]
    Expired,

    #[error("malformed archive: {0}")]
    Malformed(#[from] zip::result::ZipError),

    #[error("archive read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactReaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArtifactReaderError::TooLarge(_) => ErrorKind::ArtifactTooLarge,
            ArtifactReaderError::Expired => ErrorKind::ArtifactExpired,
            ArtifactReaderError::Malformed(_) => ErrorKind::ParseError,
            ArtifactReaderError::Io(_) => ErrorKind::UpstreamUnavailable,
        }
    }

    /// Per design doc §4.2/§4.11: too-large and expired archives complete
    /// without retry, a malformed archive is a parse failure (retry once),
    /// transport IO is retried like any upstream hiccup.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArtifactReaderError::Io(_))
    }
}
