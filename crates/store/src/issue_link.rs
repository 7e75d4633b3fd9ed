//! Issue link lookups backing the idempotent `open_issue` action (design
//! doc §4.10): an issue is opened at most once per `(test_case_id,
//! provider)` by checking for an existing link first.

use crate::error::{classify, StoreResult};
use shared::models::IssueLink;
use sqlx::{Executor, Postgres};

pub struct IssueLinkStore;

impl IssueLinkStore {
    pub async fn find<'e, E>(executor: E, test_case_id: uuid::Uuid, provider: &str) -> StoreResult<Option<IssueLink>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, IssueLink>(
            "SELECT * FROM issue_links WHERE test_case_id = $1 AND provider = $2",
        )
        .bind(test_case_id)
        .bind(provider)
        .fetch_optional(executor)
        .await
        .map_err(classify)
    }

    pub async fn insert<'e, E>(executor: E, test_case_id: uuid::Uuid, provider: &str, url: &str) -> StoreResult<IssueLink>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, IssueLink>(
            r#"
            INSERT INTO issue_links (id, test_case_id, provider, url, created_at)
            VALUES (gen_random_uuid(), $1, $2, $3, now())
            RETURNING *
            "#,
        )
        .bind(test_case_id)
        .bind(provider)
        .bind(url)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }
}
