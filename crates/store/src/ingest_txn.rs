//! Transaction scoping for one ingest job (design doc §4.4): every write
//! touching the run/job/test-case/occurrence rows produced by parsing a
//! single workflow run's artifacts commits or rolls back together.

use crate::error::{classify, StoreResult};
use shared::db::DbPool;
use sqlx::{Postgres, Transaction};

/// Begins a transaction, runs `f` with it, and commits on success. `f`'s
/// error is propagated after an implicit rollback (transactions roll back
/// on drop per sqlx's `Transaction`).
pub async fn run_in_transaction<'a, F, Fut, T>(pool: &DbPool, f: F) -> StoreResult<T>
where
    F: FnOnce(Transaction<'a, Postgres>) -> Fut,
    Fut: std::future::Future<Output = StoreResult<(Transaction<'a, Postgres>, T)>>,
{
    let tx = pool.begin().await.map_err(classify)?;
    let (tx, value) = f(tx).await?;
    tx.commit().await.map_err(classify)?;
    Ok(value)
}
