//! Flake score upsert (design doc §4.6). One current row per test case;
//! the scorer recomputes and replaces it wholesale on every pass.

use crate::error::{classify, StoreResult};
use shared::models::FlakeScore;
use sqlx::{Executor, Postgres};

pub struct ScoreStore;

impl ScoreStore {
    pub async fn upsert<'e, E>(
        executor: E,
        test_case_id: uuid::Uuid,
        score: f64,
        confidence: f64,
        features: serde_json::Value,
        window_n: i64,
    ) -> StoreResult<FlakeScore>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, FlakeScore>(
            r#"
            INSERT INTO flake_scores (test_case_id, score, confidence, features, window_n, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (test_case_id) DO UPDATE SET
                score = EXCLUDED.score,
                confidence = EXCLUDED.confidence,
                features = EXCLUDED.features,
                window_n = EXCLUDED.window_n,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(test_case_id)
        .bind(score)
        .bind(confidence)
        .bind(features)
        .bind(window_n)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }

    pub async fn find<'e, E>(executor: E, test_case_id: uuid::Uuid) -> StoreResult<Option<FlakeScore>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, FlakeScore>("SELECT * FROM flake_scores WHERE test_case_id = $1")
            .bind(test_case_id)
            .fetch_optional(executor)
            .await
            .map_err(classify)
    }

    /// Scores at or above `threshold`, the quarantine-candidate feed
    /// (design doc §4.10).
    pub async fn above_threshold<'e, E>(executor: E, threshold: f64) -> StoreResult<Vec<FlakeScore>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, FlakeScore>("SELECT * FROM flake_scores WHERE score >= $1 ORDER BY score DESC")
            .bind(threshold)
            .fetch_all(executor)
            .await
            .map_err(classify)
    }
}
