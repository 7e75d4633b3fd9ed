//! Transparent single retry on natural-key conflicts (design doc §4.4).

use crate::error::{classify, is_unique_violation, StoreError, StoreResult};
use std::future::Future;

/// Runs `f` once; if it fails with a unique-violation, runs it exactly once
/// more before giving up. A conflict that survives both attempts is
/// returned as [`StoreError::Conflict`], not retried further by the store.
pub async fn retry_on_conflict<F, Fut, T>(mut f: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match f().await {
        Ok(v) => Ok(v),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!("natural-key conflict, retrying once");
            f().await.map_err(classify)
        }
        Err(e) => Err(classify(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_no_conflict() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<i32> = retry_on_conflict(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
