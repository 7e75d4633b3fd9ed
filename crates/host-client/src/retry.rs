//! Exponential backoff with jitter for host calls (design doc §4.1).

use crate::error::HostClientError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff capped at `max_delay`, with up to 20% jitter so
    /// concurrently-retrying callers don't all wake at once.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..=(capped / 5).max(1));
        Duration::from_millis(capped + jitter)
    }

    pub fn should_retry(&self, attempt: u32, err: &HostClientError) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }
}

/// Run `f` under the retry policy, sleeping between attempts. A
/// `RateLimited` error waits until its reset epoch instead of the
/// exponential schedule, per design doc §4.1/§8 scenario 5.
pub async fn execute_with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, HostClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HostClientError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = match &e {
                    HostClientError::RateLimited { reset_at } => {
                        let now = chrono::Utc::now().timestamp();
                        Duration::from_secs((reset_at - now).max(0) as u64)
                    }
                    _ => policy.delay_for_attempt(attempt),
                };
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying host call");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert!(policy.delay_for_attempt(1).as_millis() >= 100);
        assert!(policy.delay_for_attempt(10).as_millis() <= 1200);
    }

    #[tokio::test]
    async fn succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let result = execute_with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HostClientError::UpstreamUnavailable("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = execute_with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HostClientError::BadRequest("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
