//! Redis-backed durable queues (design doc §4.11): a single `JobQueue`
//! trait covering consume/enqueue/release/retry/send_to_dead for
//! FlakeGuard's logical queues, with natural-key idempotency on enqueue.

use crate::error::{OrchError, OrchResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use shared::jobs::{inflight_key, Job, JobKind, QUEUE_DEAD};

/// Queue abstraction for testability, mirroring `JobConsumer`'s split
/// between a trait and a Redis-backed implementation.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues `job`. Returns `false` without enqueuing if a job with the
    /// same idempotency key is already in a non-terminal state.
    async fn enqueue(&self, job: Job) -> OrchResult<bool>;

    /// Blocks up to `timeout_secs` waiting for the next job on `kind`'s
    /// queue.
    async fn consume(&self, kind: JobKind, timeout_secs: u64) -> OrchResult<Option<Job>>;

    async fn queue_len(&self, kind: JobKind) -> OrchResult<u64>;

    /// Marks `job`'s idempotency key as free again: called once a job
    /// reaches a terminal outcome (completed or dead).
    async fn release(&self, job: &Job) -> OrchResult<()>;

    /// Re-enqueues a job that failed in a retryable way, onto the tail of
    /// its own queue, without touching the idempotency set.
    async fn retry(&self, job: Job) -> OrchResult<()>;

    /// Moves a job to the dead queue and releases its idempotency key.
    async fn send_to_dead(&self, job: Job, error: &str) -> OrchResult<()>;
}

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> OrchResult<bool> {
        let mut conn = self.conn.clone();
        let added = shared::jobs::enqueue(&mut conn, &job).await?;
        if !added {
            tracing::debug!(
                idempotency_key = %job.idempotency_key,
                queue = job.kind.queue_name(),
                "job already in flight, dropping duplicate"
            );
        }
        Ok(added)
    }

    async fn consume(&self, kind: JobKind, timeout_secs: u64) -> OrchResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn
            .brpop(kind.queue_name(), timeout_secs as f64)
            .await
            .map_err(OrchError::Redis)?;
        match result {
            Some((_, json)) => {
                let job: Job = serde_json::from_str(&json).map_err(OrchError::Payload)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn queue_len(&self, kind: JobKind) -> OrchResult<u64> {
        let mut conn = self.conn.clone();
        conn.llen(kind.queue_name()).await.map_err(OrchError::Redis)
    }

    async fn release(&self, job: &Job) -> OrchResult<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(inflight_key(job.kind), &job.idempotency_key)
            .await
            .map_err(OrchError::Redis)
    }

    async fn retry(&self, job: Job) -> OrchResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&job).map_err(OrchError::Payload)?;
        conn.lpush::<_, _, ()>(job.kind.queue_name(), &json)
            .await
            .map_err(OrchError::Redis)
    }

    async fn send_to_dead(&self, job: Job, error: &str) -> OrchResult<()> {
        tracing::error!(
            job_id = %job.id,
            idempotency_key = %job.idempotency_key,
            queue = job.kind.queue_name(),
            attempt = job.attempt,
            error = %error,
            "job exhausted retries, moved to dead queue"
        );
        let mut conn = self.conn.clone();
        let entry = serde_json::json!({ "job": job, "error": error });
        conn.lpush::<_, _, ()>(QUEUE_DEAD, entry.to_string())
            .await
            .map_err(OrchError::Redis)?;
        self.release(&job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_key_namespaces_by_queue() {
        assert_eq!(inflight_key(JobKind::Ingest), "flakeguard:inflight:flakeguard:ingest");
        assert_ne!(inflight_key(JobKind::Ingest), inflight_key(JobKind::Analyze));
    }
}
