//! Repository upserts and poller queries (design doc §4.4, §4.12).

use crate::error::{classify, StoreResult};
use chrono::{DateTime, Utc};
use shared::models::Repository;
use sqlx::{Executor, Postgres};

pub struct RepositoryStore;

impl RepositoryStore {
    /// Upsert keyed by `(provider, owner, name)`.
    pub async fn upsert<'e, E>(
        executor: E,
        provider: &str,
        owner: &str,
        name: &str,
        installation_ref: &str,
        default_branch: &str,
    ) -> StoreResult<Repository>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Repository>(
            r#"
            INSERT INTO repositories (id, provider, owner, name, installation_ref, default_branch, last_polled_at, active)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NULL, true)
            ON CONFLICT (provider, owner, name) DO UPDATE SET
                installation_ref = EXCLUDED.installation_ref,
                default_branch = EXCLUDED.default_branch,
                active = true
            RETURNING *
            "#,
        )
        .bind(provider)
        .bind(owner)
        .bind(name)
        .bind(installation_ref)
        .bind(default_branch)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: uuid::Uuid) -> StoreResult<Option<Repository>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(classify)
    }

    pub async fn find_by_natural_key<'e, E>(
        executor: E,
        provider: &str,
        owner: &str,
        name: &str,
    ) -> StoreResult<Option<Repository>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE provider = $1 AND owner = $2 AND name = $3",
        )
        .bind(provider)
        .bind(owner)
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(classify)
    }

    /// Repositories due for another poll sweep, per design doc §4.12.
    pub async fn due_for_poll<'e, E>(
        executor: E,
        interval: chrono::Duration,
        limit: i64,
    ) -> StoreResult<Vec<Repository>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let cutoff = Utc::now() - interval;
        sqlx::query_as::<_, Repository>(
            r#"
            SELECT * FROM repositories
            WHERE active = true
              AND (last_polled_at IS NULL OR last_polled_at < $1)
            ORDER BY last_polled_at ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
        .map_err(classify)
    }

    pub async fn mark_polled<'e, E>(executor: E, repository_id: uuid::Uuid, at: DateTime<Utc>) -> StoreResult<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE repositories SET last_polled_at = $1 WHERE id = $2")
            .bind(at)
            .bind(repository_id)
            .execute(executor)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
