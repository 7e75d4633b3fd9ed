//! Error taxonomy for calls to the code host (design doc §7).

use shared::error::ErrorKind;
use thiserror::Error;

pub type HostResult<T> = std::result::Result<T, HostClientError>;

#[derive(Debug, Error)]
pub enum HostClientError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("installation credentials invalid or expired: {0}")]
    AuthFailure(String),

    #[error("rate limited, reset at {reset_at}")]
    RateLimited { reset_at: i64 },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("request transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HostClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostClientError::BadRequest(_) => ErrorKind::BadRequest,
            HostClientError::AuthFailure(_) => ErrorKind::AuthFailure,
            HostClientError::RateLimited { .. } => ErrorKind::RateLimited,
            HostClientError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            HostClientError::Transport(_) => ErrorKind::UpstreamUnavailable,
            HostClientError::Serialization(_) => ErrorKind::InternalError,
            HostClientError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Per design doc §4.1: retries only on 5xx, 429, and connection errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HostClientError::RateLimited { .. }
                | HostClientError::UpstreamUnavailable(_)
                | HostClientError::Transport(_)
        )
    }

    /// Sanitized message safe to surface on interactive check-run actions;
    /// never leaks transport internals or credentials.
    pub fn safe_message(&self) -> String {
        match self {
            HostClientError::BadRequest(m) => format!("request rejected: {}", truncate(m)),
            HostClientError::AuthFailure(_) => "installation authentication failed".to_string(),
            HostClientError::RateLimited { reset_at } => {
                format!("rate limited, retry after {}", reset_at)
            }
            HostClientError::UpstreamUnavailable(_) => "code host unavailable".to_string(),
            HostClientError::Transport(_) => "code host unavailable".to_string(),
            HostClientError::Serialization(_) => "unexpected response from code host".to_string(),
            HostClientError::Internal(_) => "internal error".to_string(),
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() > 200 {
        format!("{}...", &s[..200])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        assert!(HostClientError::RateLimited { reset_at: 0 }.is_retryable());
    }

    #[test]
    fn bad_request_is_not_retryable() {
        assert!(!HostClientError::BadRequest("x".into()).is_retryable());
    }

    #[test]
    fn safe_message_never_echoes_auth_details() {
        let e = HostClientError::AuthFailure("token abc123 rejected".into());
        assert!(!e.safe_message().contains("abc123"));
    }
}
