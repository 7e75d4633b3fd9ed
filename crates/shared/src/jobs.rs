//! Job payload definitions for the ingest worker's queues (design doc §4.11).
//!
//! Jobs are enqueued to Redis lists by the api-gateway (webhook intake) and
//! the poller, and consumed by the ingest worker's per-queue worker pools.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Queue a webhook delivery is placed on, keyed by delivery id.
pub const QUEUE_EVENTS: &str = "flakeguard:events";
/// Queue for one job per `(repo, workflow_run_id)`.
pub const QUEUE_INGEST: &str = "flakeguard:ingest";
/// Queue for one job per `(repo, workflow_run_id)` after ingest, or a single test.
pub const QUEUE_ANALYZE: &str = "flakeguard:analyze";
/// Queue for batch recompute scopes (all tests / pattern / explicit list).
pub const QUEUE_RECOMPUTE: &str = "flakeguard:recompute";
/// Queue for the poller's scheduled fan-out.
pub const QUEUE_POLL: &str = "flakeguard:poll";
/// Terminal holding queue for jobs that exhausted retries.
pub const QUEUE_DEAD: &str = "flakeguard:dead";

/// Which logical queue a [`Job`] belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Events,
    Ingest,
    Analyze,
    Recompute,
    Poll,
}

impl JobKind {
    pub fn queue_name(self) -> &'static str {
        match self {
            JobKind::Events => QUEUE_EVENTS,
            JobKind::Ingest => QUEUE_INGEST,
            JobKind::Analyze => QUEUE_ANALYZE,
            JobKind::Recompute => QUEUE_RECOMPUTE,
            JobKind::Poll => QUEUE_POLL,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.queue_name())
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            QUEUE_EVENTS => Ok(JobKind::Events),
            QUEUE_INGEST => Ok(JobKind::Ingest),
            QUEUE_ANALYZE => Ok(JobKind::Analyze),
            QUEUE_RECOMPUTE => Ok(JobKind::Recompute),
            QUEUE_POLL => Ok(JobKind::Poll),
            _ => anyhow::bail!("unknown queue name: {}", s),
        }
    }
}

/// A queued unit of work. `idempotency_key` is the natural job key from
/// design doc §4.11: a job with an existing key in any non-terminal state
/// is dropped at enqueue time rather than duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub leased_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, idempotency_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            idempotency_key: idempotency_key.into(),
            payload,
            attempt: 0,
            leased_at: None,
            created_at: Utc::now(),
        }
    }

    /// Build the idempotency key for an `ingest`/`analyze` job keyed on
    /// `(repo, workflow_run_id)`, per design doc §4.11.
    pub fn repo_run_key(repository_id: &str, workflow_run_id: &str) -> String {
        format!("{}:{}", repository_id, workflow_run_id)
    }
}

/// Namespaced key for the Redis set tracking idempotency keys currently
/// in flight on `kind`'s queue. Membership is cleared when the consumer
/// reaches a terminal outcome for the job.
pub fn inflight_key(kind: JobKind) -> String {
    format!("flakeguard:inflight:{}", kind.queue_name())
}

/// Enqueues `job`, deduplicating on `idempotency_key` within its queue:
/// a job already in flight is dropped (`Ok(false)`) rather than queued
/// twice. Shared by the webhook intake surface and the job orchestrator's
/// own re-enqueue paths (design doc §4.11).
pub async fn enqueue(conn: &mut ConnectionManager, job: &Job) -> Result<bool> {
    let added: i64 = conn
        .sadd(inflight_key(job.kind), &job.idempotency_key)
        .await
        .map_err(|e| Error::internal(format!("redis sadd failed: {}", e)))?;
    if added == 0 {
        return Ok(false);
    }
    let json = serde_json::to_string(job).map_err(|e| Error::internal(format!("job serialization failed: {}", e)))?;
    conn.lpush::<_, _, ()>(job.kind.queue_name(), &json)
        .await
        .map_err(|e| Error::internal(format!("redis lpush failed: {}", e)))?;
    Ok(true)
}

/// Payload for an `events` job: one inbound webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDeliveryPayload {
    pub delivery_id: String,
    pub event_type: String,
    pub body: serde_json::Value,
}

/// Payload for an `ingest` job: fetch artifacts and parse reports for one
/// workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    pub repository_id: uuid::Uuid,
    pub installation_ref: String,
    pub external_run_id: String,
}

/// Payload for an `analyze` job: recompute scores/clusters for one
/// workflow run, or for a single test case when `test_case_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzePayload {
    pub repository_id: uuid::Uuid,
    pub workflow_run_id: Option<uuid::Uuid>,
    pub test_case_id: Option<uuid::Uuid>,
}

/// Payload for a `recompute` job: a batch scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecomputeScope {
    AllTests { repository_id: uuid::Uuid },
    Pattern { repository_id: uuid::Uuid, name_pattern: String },
    Explicit { test_case_ids: Vec<uuid::Uuid> },
}

/// Payload for a `poll` job: sweep one repository for missed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPayload {
    pub repository_id: uuid::Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_kind_round_trips_through_queue_name() {
        for kind in [
            JobKind::Events,
            JobKind::Ingest,
            JobKind::Analyze,
            JobKind::Recompute,
            JobKind::Poll,
        ] {
            let parsed: JobKind = kind.queue_name().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn job_ids_are_unique() {
        let a = Job::new(JobKind::Ingest, "k", json!({}));
        let b = Job::new(JobKind::Ingest, "k", json!({}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn repo_run_key_is_stable() {
        assert_eq!(Job::repo_run_key("r1", "42"), Job::repo_run_key("r1", "42"));
        assert_ne!(Job::repo_run_key("r1", "42"), Job::repo_run_key("r1", "43"));
    }

    #[test]
    fn job_serialization_round_trips() {
        let payload = IngestPayload {
            repository_id: uuid::Uuid::new_v4(),
            installation_ref: "inst-1".into(),
            external_run_id: "99".into(),
        };
        let job = Job::new(
            JobKind::Ingest,
            Job::repo_run_key("r1", "99"),
            serde_json::to_value(&payload).unwrap(),
        );
        let s = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&s).unwrap();
        assert_eq!(job.id, back.id);
        assert_eq!(job.kind, back.kind);
    }
}
