//! Test case upserts, including chunked batch upserts (design doc §4.4).

use crate::chunk::{chunks, DEFAULT_CHUNK_SIZE};
use crate::error::{classify, StoreResult};
use shared::models::TestCase;
use sqlx::{Executor, Postgres};

pub struct TestCaseStore;

/// A test case identity observed during parsing, not yet assigned an id.
#[derive(Debug, Clone)]
pub struct NewTestCase {
    pub suite: String,
    pub class_name: String,
    pub name: String,
    pub file: Option<String>,
}

impl TestCaseStore {
    /// Upsert keyed by `(repository_id, suite, class_name, name)`.
    pub async fn upsert_one<'e, E>(executor: E, repository_id: uuid::Uuid, case: &NewTestCase) -> StoreResult<TestCase>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, TestCase>(
            r#"
            INSERT INTO test_cases (id, repository_id, suite, class_name, name, file, owner_team)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NULL)
            ON CONFLICT (repository_id, suite, class_name, name) DO UPDATE SET
                file = COALESCE(EXCLUDED.file, test_cases.file)
            RETURNING *
            "#,
        )
        .bind(repository_id)
        .bind(&case.suite)
        .bind(&case.class_name)
        .bind(&case.name)
        .bind(&case.file)
        .fetch_one(executor)
        .await
        .map_err(classify)
    }

    /// Batch upsert, one statement per chunk of at most
    /// `DEFAULT_CHUNK_SIZE` rows (design doc §4.4), via `UNNEST` arrays so
    /// a chunk of 500 test cases is a single round trip.
    pub async fn upsert_batch<'e, E>(
        executor: E,
        repository_id: uuid::Uuid,
        cases: &[NewTestCase],
    ) -> StoreResult<Vec<TestCase>>
    where
        E: Executor<'e, Database = Postgres> + Copy,
    {
        let mut out = Vec::with_capacity(cases.len());
        for chunk in chunks(cases, DEFAULT_CHUNK_SIZE) {
            let suites: Vec<&str> = chunk.iter().map(|c| c.suite.as_str()).collect();
            let class_names: Vec<&str> = chunk.iter().map(|c| c.class_name.as_str()).collect();
            let names: Vec<&str> = chunk.iter().map(|c| c.name.as_str()).collect();
            let files: Vec<Option<&str>> = chunk.iter().map(|c| c.file.as_deref()).collect();

            let rows = sqlx::query_as::<_, TestCase>(
                r#"
                INSERT INTO test_cases (id, repository_id, suite, class_name, name, file, owner_team)
                SELECT gen_random_uuid(), $1, s.suite, s.class_name, s.name, s.file, NULL
                FROM UNNEST($2::text[], $3::text[], $4::text[], $5::text[])
                    AS s(suite, class_name, name, file)
                ON CONFLICT (repository_id, suite, class_name, name) DO UPDATE SET
                    file = COALESCE(EXCLUDED.file, test_cases.file)
                RETURNING *
                "#,
            )
            .bind(repository_id)
            .bind(&suites)
            .bind(&class_names)
            .bind(&names)
            .bind(&files)
            .fetch_all(executor)
            .await
            .map_err(classify)?;

            out.extend(rows);
        }
        Ok(out)
    }

    /// All test cases for a repository, the analyze job's scoring scope
    /// when no single test is named (design doc §4.6/§4.11).
    pub async fn for_repository<'e, E>(executor: E, repository_id: uuid::Uuid) -> StoreResult<Vec<TestCase>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, TestCase>("SELECT * FROM test_cases WHERE repository_id = $1")
            .bind(repository_id)
            .fetch_all(executor)
            .await
            .map_err(classify)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: uuid::Uuid) -> StoreResult<Option<TestCase>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, TestCase>("SELECT * FROM test_cases WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_test_case_carries_natural_key_fields() {
        let c = NewTestCase {
            suite: "pkg.Suite".into(),
            class_name: "pkg.Suite".into(),
            name: "test_foo".into(),
            file: Some("src/foo.rs".into()),
        };
        assert_eq!(c.name, "test_foo");
    }
}
