//! Quarantine decision history and current-state lookups (design doc §4.10).

use crate::error::{classify, StoreResult};
use shared::models::{QuarantineDecision, QuarantineState};
use sqlx::{Executor, Postgres};

pub struct QuarantineStore;

impl QuarantineStore {
    /// Records a new decision. Decisions are append-only history, not
    /// upserted; the current state is whichever row is most recent.
    pub async fn record<'e, E>(
        executor: E,
        test_case_id: uuid::Uuid,
        state: QuarantineState,
        rationale: &str,
        by_user: &str,
        until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<QuarantineDecision>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, QuarantineDecision>(
            r#"
            INSERT INTO quarantine_decisions (id, test_case_id, state, rationale, by_user, until, created_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now())
            RETURNING *
            "#,
        )
        .bind(test_case_id)
        .bind(state)
        .bind(rationale)
        .bind(by_user)
        .bind(until)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }

    /// The most recent decision for a test case, whether terminal or not.
    pub async fn latest<'e, E>(executor: E, test_case_id: uuid::Uuid) -> StoreResult<Option<QuarantineDecision>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, QuarantineDecision>(
            "SELECT * FROM quarantine_decisions WHERE test_case_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(test_case_id)
        .fetch_optional(executor)
        .await
        .map_err(classify)
    }

    /// The current non-terminal decision, if any. A test with none is
    /// eligible for a fresh quarantine proposal; a test with one is not
    /// (design doc: "at most one non-terminal decision at a time").
    pub async fn current_quarantine<'e, E>(executor: E, test_case_id: uuid::Uuid) -> StoreResult<Option<QuarantineDecision>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let latest = Self::latest(executor, test_case_id).await?;
        Ok(latest.filter(|d| !d.state.is_terminal()))
    }
}
