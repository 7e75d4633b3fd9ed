//! Failure cluster upserts (design doc §4.7).

use crate::error::{classify, StoreResult};
use chrono::{DateTime, Utc};
use shared::models::FailureCluster;
use sqlx::{Executor, Postgres};

pub struct ClusterStore;

impl ClusterStore {
    /// Upsert keyed by `(repository_id, message_signature)`. Callers
    /// recompute `occurrence_count` from scratch over the full lookback
    /// window on every analyze pass, so it replaces rather than adds to the
    /// stored value; accumulating it here would double-count every
    /// occurrence still inside the window on each subsequent pass.
    /// Membership and the observation window still only grow:
    /// `test_case_ids` is merged rather than replaced, `window_start`/
    /// `window_end` widen to cover both the existing row and the incoming
    /// observation.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert<'e, E>(
        executor: E,
        repository_id: uuid::Uuid,
        message_signature: &str,
        stack_digest: Option<&str>,
        example_message: &str,
        example_stack: Option<&str>,
        test_case_ids: &[uuid::Uuid],
        occurrence_count: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<FailureCluster>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let ids_json = serde_json::to_value(test_case_ids).expect("uuid vec always serializes");
        sqlx::query_as::<_, FailureCluster>(
            r#"
            INSERT INTO failure_clusters
                (id, repository_id, message_signature, stack_digest, example_message, example_stack,
                 test_case_ids, occurrence_count, window_start, window_end)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (repository_id, message_signature) DO UPDATE SET
                stack_digest = COALESCE(EXCLUDED.stack_digest, failure_clusters.stack_digest),
                example_message = EXCLUDED.example_message,
                example_stack = COALESCE(EXCLUDED.example_stack, failure_clusters.example_stack),
                test_case_ids = (
                    SELECT to_jsonb(array_agg(DISTINCT elem))
                    FROM jsonb_array_elements_text(failure_clusters.test_case_ids || EXCLUDED.test_case_ids) AS elem
                ),
                occurrence_count = EXCLUDED.occurrence_count,
                window_start = LEAST(failure_clusters.window_start, EXCLUDED.window_start),
                window_end = GREATEST(failure_clusters.window_end, EXCLUDED.window_end)
            RETURNING *
            "#,
        )
        .bind(repository_id)
        .bind(message_signature)
        .bind(stack_digest)
        .bind(example_message)
        .bind(example_stack)
        .bind(ids_json)
        .bind(occurrence_count)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }

    pub async fn for_repository<'e, E>(executor: E, repository_id: uuid::Uuid) -> StoreResult<Vec<FailureCluster>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, FailureCluster>(
            "SELECT * FROM failure_clusters WHERE repository_id = $1 ORDER BY window_end DESC",
        )
        .bind(repository_id)
        .fetch_all(executor)
        .await
        .map_err(classify)
    }
}
