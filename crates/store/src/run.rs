//! Workflow run and job upserts (design doc §4.4).

use crate::error::{classify, StoreResult};
use shared::models::{Job, WorkflowRun};
use sqlx::{Executor, Postgres};

pub struct WorkflowRunStore;

impl WorkflowRunStore {
    /// Upsert keyed by `(repository_id, external_run_id)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert<'e, E>(
        executor: E,
        repository_id: uuid::Uuid,
        external_run_id: &str,
        status: &str,
        conclusion: Option<&str>,
        head_sha: &str,
        head_branch: &str,
        run_number: i64,
        attempt: i32,
    ) -> StoreResult<WorkflowRun>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let now = chrono::Utc::now();
        sqlx::query_as::<_, WorkflowRun>(
            r#"
            INSERT INTO workflow_runs
                (id, repository_id, external_run_id, status, conclusion, head_sha, head_branch, run_number, attempt, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (repository_id, external_run_id) DO UPDATE SET
                status = EXCLUDED.status,
                conclusion = EXCLUDED.conclusion,
                attempt = EXCLUDED.attempt,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(repository_id)
        .bind(external_run_id)
        .bind(status)
        .bind(conclusion)
        .bind(head_sha)
        .bind(head_branch)
        .bind(run_number)
        .bind(attempt)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: uuid::Uuid) -> StoreResult<Option<WorkflowRun>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, WorkflowRun>("SELECT * FROM workflow_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(classify)
    }

    pub async fn find_by_external_id<'e, E>(
        executor: E,
        repository_id: uuid::Uuid,
        external_run_id: &str,
    ) -> StoreResult<Option<WorkflowRun>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, WorkflowRun>(
            "SELECT * FROM workflow_runs WHERE repository_id = $1 AND external_run_id = $2",
        )
        .bind(repository_id)
        .bind(external_run_id)
        .fetch_optional(executor)
        .await
        .map_err(classify)
    }
}

pub struct JobStore;

impl JobStore {
    /// Upsert keyed by `(workflow_run_id, external_job_id)`.
    pub async fn upsert<'e, E>(
        executor: E,
        workflow_run_id: uuid::Uuid,
        external_job_id: &str,
        name: &str,
        status: &str,
        conclusion: Option<&str>,
        started_at: Option<chrono::DateTime<chrono::Utc>>,
        completed_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<Job>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, workflow_run_id, external_job_id, name, status, conclusion, started_at, completed_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (workflow_run_id, external_job_id) DO UPDATE SET
                status = EXCLUDED.status,
                conclusion = EXCLUDED.conclusion,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            RETURNING *
            "#,
        )
        .bind(workflow_run_id)
        .bind(external_job_id)
        .bind(name)
        .bind(status)
        .bind(conclusion)
        .bind(started_at)
        .bind(completed_at)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }
}
