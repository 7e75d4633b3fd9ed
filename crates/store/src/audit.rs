//! Ingest audit rows, observability only (SPEC_FULL.md supplement).

use crate::error::{classify, StoreResult};
use shared::models::IngestAudit;
use sqlx::{Executor, Postgres};

pub struct AuditStore;

impl AuditStore {
    #[allow(clippy::too_many_arguments)]
    pub async fn record<'e, E>(
        executor: E,
        repository_id: uuid::Uuid,
        workflow_run_id: uuid::Uuid,
        outcome: &str,
        occurrences_inserted: i64,
        warnings: i32,
        duration_ms: i64,
    ) -> StoreResult<IngestAudit>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, IngestAudit>(
            r#"
            INSERT INTO ingest_audits
                (id, repository_id, workflow_run_id, outcome, occurrences_inserted, warnings, duration_ms, created_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, now())
            RETURNING *
            "#,
        )
        .bind(repository_id)
        .bind(workflow_run_id)
        .bind(outcome)
        .bind(occurrences_inserted)
        .bind(warnings)
        .bind(duration_ms)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }
}
