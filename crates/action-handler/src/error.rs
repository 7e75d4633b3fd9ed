//! Error taxonomy for C10 (design doc §4.10).

use shared::error::ErrorKind;
use thiserror::Error;

pub type ActionResult<T> = std::result::Result<T, ActionError>;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("host client error: {0}")]
    Host(#[from] host_client::error::HostClientError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Host(e) => e.kind(),
            ActionError::Store(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::Host(e) => e.is_retryable(),
            ActionError::Store(e) => e.is_retryable(),
        }
    }
}
