//! Installation token cache with a single-flight refresh lock (design doc §4.1/§5).
//!
//! Tokens are cached until `expiry - 60s`; concurrent callers for the same
//! installation share one in-flight refresh rather than each hitting the
//! host.

use crate::error::{HostClientError, HostResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expiry: DateTime<Utc>,
}

/// Per-installation single-flight token cache.
#[derive(Default)]
pub struct TokenCache {
    locks: DashMap<String, Arc<Mutex<Option<CachedToken>>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, installation: &str) -> Arc<Mutex<Option<CachedToken>>> {
        self.locks
            .entry(installation.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return a cached, unexpired token, or call `refresh` to mint a new
    /// one. Only one refresh runs per installation at a time; other callers
    /// block on the same mutex and observe the freshly cached value.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        installation: &str,
        refresh: F,
    ) -> HostResult<(String, DateTime<Utc>)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HostResult<(String, DateTime<Utc>)>>,
    {
        let lock = self.lock_for(installation);
        let mut guard = lock.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.expiry - chrono::Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS) > Utc::now() {
                return Ok((cached.token.clone(), cached.expiry));
            }
        }

        let (token, expiry) = refresh().await.map_err(|e| {
            HostClientError::AuthFailure(format!("installation token refresh failed: {}", e))
        })?;
        *guard = Some(CachedToken {
            token: token.clone(),
            expiry,
        });
        Ok((token, expiry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn reuses_cached_token_until_near_expiry() {
        let cache = TokenCache::new();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = cache
                .get_or_refresh("inst-1", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(("tok".to_string(), Utc::now() + chrono::Duration::hours(1))) }
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_when_near_expiry() {
        let cache = TokenCache::new();
        let _ = cache
            .get_or_refresh("inst-1", || async {
                Ok(("stale".to_string(), Utc::now() + chrono::Duration::seconds(10)))
            })
            .await
            .unwrap();

        let (token, _) = cache
            .get_or_refresh("inst-1", || async {
                Ok(("fresh".to_string(), Utc::now() + chrono::Duration::hours(1)))
            })
            .await
            .unwrap();
        assert_eq!(token, "fresh");
    }
}
