//! Error taxonomy for the job orchestrator (design doc §4.11/§7).

use shared::error::ErrorKind;
use thiserror::Error;

pub type OrchResult<T> = std::result::Result<T, OrchError>;

#[derive(Debug, Error)]
pub enum OrchError {
    #[error("host client error: {0}")]
    Host(#[from] host_client::error::HostClientError),

    #[error("artifact reader error: {0}")]
    Artifact(#[from] artifact_reader::ArtifactReaderError),

    #[error("report parser error: {0}")]
    Parser(#[from] report_parser::ReportParserError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("shared infrastructure error: {0}")]
    Shared(#[from] shared::error::Error),

    #[error("job payload malformed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("no such workflow run in store for repository {repository_id} run {external_run_id}")]
    RunNotFound {
        repository_id: uuid::Uuid,
        external_run_id: String,
    },
}

impl OrchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchError::Host(e) => e.kind(),
            OrchError::Artifact(e) => e.kind(),
            OrchError::Parser(e) => e.kind(),
            OrchError::Store(e) => e.kind(),
            OrchError::Redis(_) => ErrorKind::UpstreamUnavailable,
            OrchError::Shared(_) => ErrorKind::UpstreamUnavailable,
            OrchError::Payload(_) => ErrorKind::BadRequest,
            OrchError::RunNotFound { .. } => ErrorKind::BadRequest,
        }
    }

    /// Reset epoch to wait for, when the failure is a rate limit.
    pub fn retry_after_secs(&self) -> Option<i64> {
        match self {
            OrchError::Host(host_client::error::HostClientError::RateLimited { reset_at }) => {
                Some((*reset_at - chrono::Utc::now().timestamp()).max(1))
            }
            _ => None,
        }
    }
}
