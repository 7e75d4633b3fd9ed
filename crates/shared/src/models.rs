//! Data models matching the PostgreSQL schema (design doc §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A code-host repository FlakeGuard tracks. Keyed by `(provider, owner,
/// name)`; created on first observation, deactivated by explicit action.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: uuid::Uuid,
    pub provider: String,
    pub owner: String,
    pub name: String,
    pub installation_ref: String,
    pub default_branch: String,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// One CI workflow run. Unique on `(repository_id, external_run_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRun {
    pub id: uuid::Uuid,
    pub repository_id: uuid::Uuid,
    pub external_run_id: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub head_sha: String,
    pub head_branch: String,
    pub run_number: i64,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One job within a workflow run. Unique on `(workflow_run_id,
/// external_job_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: uuid::Uuid,
    pub workflow_run_id: uuid::Uuid,
    pub external_job_id: String,
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A distinct test identity within a repository. Unique full-name on
/// `(repository_id, suite, class_name, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestCase {
    pub id: uuid::Uuid,
    pub repository_id: uuid::Uuid,
    pub suite: String,
    pub class_name: String,
    pub name: String,
    pub file: Option<String>,
    pub owner_team: Option<String>,
}

/// The outcome of a status field constrained to the set used throughout
/// ingestion and analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceStatus {
    Passed,
    Failed,
    Error,
    Skipped,
    Flaky,
}

impl OccurrenceStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, OccurrenceStatus::Failed | OccurrenceStatus::Error)
    }
}

impl std::fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OccurrenceStatus::Passed => "passed",
            OccurrenceStatus::Failed => "failed",
            OccurrenceStatus::Error => "error",
            OccurrenceStatus::Skipped => "skipped",
            OccurrenceStatus::Flaky => "flaky",
        };
        write!(f, "{}", s)
    }
}

/// One test result for one `(test_case, workflow_run, attempt)`. Occurrences
/// are append-only: they are never mutated after insert, only inserted,
/// with a natural-key upsert resolving concurrent inserts for the same key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Occurrence {
    pub id: uuid::Uuid,
    pub test_case_id: uuid::Uuid,
    pub workflow_run_id: uuid::Uuid,
    pub job_id: Option<uuid::Uuid>,
    pub status: OccurrenceStatus,
    pub duration_ms: i64,
    pub attempt: i32,
    pub message: Option<String>,
    pub stack: Option<String>,
    pub message_signature: Option<String>,
    pub stack_digest: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A group of failures sharing a normalized message signature. One row per
/// `(repository_id, message_signature)`; membership grows monotonically.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FailureCluster {
    pub id: uuid::Uuid,
    pub repository_id: uuid::Uuid,
    pub message_signature: String,
    pub stack_digest: Option<String>,
    pub example_message: String,
    pub example_stack: Option<String>,
    #[sqlx(json)]
    pub test_case_ids: Vec<uuid::Uuid>,
    pub occurrence_count: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// The current flakiness score for one test case. One current row per test
/// case; `window_n` never exceeds the configured rolling window size.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlakeScore {
    pub test_case_id: uuid::Uuid,
    pub score: f64,
    pub confidence: f64,
    #[sqlx(json)]
    pub features: serde_json::Value,
    pub window_n: i64,
    pub updated_at: DateTime<Utc>,
}

/// Quarantine lifecycle state. A test has at most one non-terminal decision
/// (`proposed` or `active`) at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QuarantineState {
    Proposed,
    Active,
    Dismissed,
    Expired,
}

impl QuarantineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, QuarantineState::Dismissed | QuarantineState::Expired)
    }
}

/// A decision to quarantine (or dismiss the quarantine of) a test case.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuarantineDecision {
    pub id: uuid::Uuid,
    pub test_case_id: uuid::Uuid,
    pub state: QuarantineState,
    pub rationale: String,
    pub by_user: String,
    pub until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A tracking issue opened on the code host for a flaky test.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IssueLink {
    pub id: uuid::Uuid,
    pub test_case_id: uuid::Uuid,
    pub provider: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row for one completed ingest job (§ SPEC_FULL.md
/// supplement). Observability only — never read by a scoring path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IngestAudit {
    pub id: uuid::Uuid,
    pub repository_id: uuid::Uuid,
    pub workflow_run_id: uuid::Uuid,
    pub outcome: String,
    pub occurrences_inserted: i64,
    pub warnings: i32,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrence_status_is_failure() {
        assert!(OccurrenceStatus::Failed.is_failure());
        assert!(OccurrenceStatus::Error.is_failure());
        assert!(!OccurrenceStatus::Passed.is_failure());
        assert!(!OccurrenceStatus::Skipped.is_failure());
    }

    #[test]
    fn quarantine_state_terminal() {
        assert!(QuarantineState::Dismissed.is_terminal());
        assert!(QuarantineState::Expired.is_terminal());
        assert!(!QuarantineState::Active.is_terminal());
        assert!(!QuarantineState::Proposed.is_terminal());
    }
}
