//! Occurrence batch inserts and the analytics reads built on top of them
//! (design doc §4.4, §4.6).

use crate::chunk::{chunks, DEFAULT_CHUNK_SIZE};
use crate::error::{classify, StoreResult};
use chrono::{DateTime, Utc};
use shared::models::{Occurrence, OccurrenceStatus};
use sqlx::{Executor, Postgres};

pub struct OccurrenceStore;

/// One parsed test result awaiting insertion, not yet assigned an id.
#[derive(Debug, Clone)]
pub struct NewOccurrence {
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
}

impl OccurrenceStore {
    /// Occurrences are append-only; a retried ingest of the same run
    /// resolves to a no-op update on the natural key `(test_case_id,
    /// workflow_run_id, attempt)` rather than a duplicate row.
    pub async fn insert_batch<'e, E>(executor: E, occurrences: &[NewOccurrence]) -> StoreResult<Vec<Occurrence>>
    where
        E: Executor<'e, Database = Postgres> + Copy,
    {
        let mut out = Vec::with_capacity(occurrences.len());
        for chunk in chunks(occurrences, DEFAULT_CHUNK_SIZE) {
            let test_case_ids: Vec<uuid::Uuid> = chunk.iter().map(|o| o.test_case_id).collect();
            let workflow_run_ids: Vec<uuid::Uuid> = chunk.iter().map(|o| o.workflow_run_id).collect();
            let job_ids: Vec<Option<uuid::Uuid>> = chunk.iter().map(|o| o.job_id).collect();
            let statuses: Vec<OccurrenceStatus> = chunk.iter().map(|o| o.status).collect();
            let durations: Vec<i64> = chunk.iter().map(|o| o.duration_ms).collect();
            let attempts: Vec<i32> = chunk.iter().map(|o| o.attempt).collect();
            let messages: Vec<Option<&str>> = chunk.iter().map(|o| o.message.as_deref()).collect();
            let stacks: Vec<Option<&str>> = chunk.iter().map(|o| o.stack.as_deref()).collect();
            let signatures: Vec<Option<&str>> = chunk.iter().map(|o| o.message_signature.as_deref()).collect();
            let digests: Vec<Option<&str>> = chunk.iter().map(|o| o.stack_digest.as_deref()).collect();

            let rows = sqlx::query_as::<_, Occurrence>(
                r#"
                INSERT INTO occurrences
                    (id, test_case_id, workflow_run_id, job_id, status, duration_ms, attempt,
                     message, stack, message_signature, stack_digest, created_at)
                SELECT gen_random_uuid(), s.test_case_id, s.workflow_run_id, s.job_id, s.status,
                       s.duration_ms, s.attempt, s.message, s.stack, s.message_signature, s.stack_digest, now()
                FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::text[], $5::bigint[], $6::int[],
                            $7::text[], $8::text[], $9::text[], $10::text[])
                    AS s(test_case_id, workflow_run_id, job_id, status, duration_ms, attempt,
                         message, stack, message_signature, stack_digest)
                ON CONFLICT (test_case_id, workflow_run_id, attempt) DO UPDATE SET
                    status = EXCLUDED.status,
                    duration_ms = EXCLUDED.duration_ms,
                    message = EXCLUDED.message,
                    stack = EXCLUDED.stack,
                    message_signature = EXCLUDED.message_signature,
                    stack_digest = EXCLUDED.stack_digest
                RETURNING *
                "#,
            )
            .bind(&test_case_ids)
            .bind(&workflow_run_ids)
            .bind(&job_ids)
            .bind(&statuses)
            .bind(&durations)
            .bind(&attempts)
            .bind(&messages)
            .bind(&stacks)
            .bind(&signatures)
            .bind(&digests)
            .fetch_all(executor)
            .await
            .map_err(classify)?;

            out.extend(rows);
        }
        Ok(out)
    }

    /// Most recent `limit` occurrences for a test case, newest first, the
    /// input window the scorer folds over (design doc §4.6).
    pub async fn recent_runs_for_test<'e, E>(
        executor: E,
        test_case_id: uuid::Uuid,
        limit: i64,
    ) -> StoreResult<Vec<Occurrence>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Occurrence>(
            r#"
            SELECT * FROM occurrences
            WHERE test_case_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(test_case_id)
        .bind(limit)
        .fetch_all(executor)
        .await
        .map_err(classify)
    }

    /// Failed/errored occurrences for a repository since a cutoff, the
    /// clustering pass's raw input (design doc §4.7).
    pub async fn failed_occurrences_for_repo<'e, E>(
        executor: E,
        repository_id: uuid::Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Occurrence>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Occurrence>(
            r#"
            SELECT o.* FROM occurrences o
            JOIN test_cases t ON t.id = o.test_case_id
            WHERE t.repository_id = $1
              AND o.status IN ('failed', 'error')
              AND o.created_at >= $2
            ORDER BY o.created_at ASC
            "#,
        )
        .bind(repository_id)
        .bind(since)
        .fetch_all(executor)
        .await
        .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_occurrence_defaults_job_id_optional() {
        let o = NewOccurrence {
            test_case_id: uuid::Uuid::nil(),
            workflow_run_id: uuid::Uuid::nil(),
            job_id: None,
            status: OccurrenceStatus::Flaky,
            duration_ms: 10,
            attempt: 1,
            message: None,
            stack: None,
            message_signature: None,
            stack_digest: None,
        };
        assert!(o.job_id.is_none());
    }
}
