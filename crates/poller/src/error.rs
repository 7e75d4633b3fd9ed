//! Error taxonomy for the backfill sweep (design doc §4.12).

use shared::error::ErrorKind;
use thiserror::Error;

pub type PollResult<T> = std::result::Result<T, PollError>;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("host client error: {0}")]
    Host(#[from] host_client::error::HostClientError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("shared infrastructure error: {0}")]
    Shared(#[from] shared::error::Error),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Host(e) => e.kind(),
            PollError::Store(e) => e.kind(),
            PollError::Redis(_) => ErrorKind::UpstreamUnavailable,
            PollError::Shared(_) => ErrorKind::UpstreamUnavailable,
        }
    }
}
