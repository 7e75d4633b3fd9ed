//! Per-error-class retry policy (design doc §4.11): exponential backoff
//! with jitter, classified by error kind into one of four dispositions.

use crate::error::OrchError;
use shared::error::ErrorKind;
use std::time::Duration;

/// What the orchestrator should do with a job that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Drop to the dead queue immediately; this class never retries.
    Drop,
    /// Retry after `delay`, counting against the job's normal attempt cap.
    Backoff,
    /// Retry exactly once more regardless of the normal attempt cap, then
    /// drop. Parser errors get this rather than the normal cap.
    OnceThenDrop,
    /// Retry after sleeping until the rate-limit reset epoch, not counted
    /// against the normal attempt cap.
    WaitForReset,
}

/// Classifies an error into a retry class, per design doc §4.11's bullet
/// list: validation errors never retry; rate-limit errors wait for reset;
/// host 5xx / upstream-unavailable retries with backoff; parser errors
/// retry once then go to the dead queue.
pub fn classify(kind: ErrorKind) -> RetryDecision {
    match kind {
        ErrorKind::BadRequest
        | ErrorKind::AuthFailure
        | ErrorKind::ArtifactTooLarge
        | ErrorKind::ArtifactExpired => RetryDecision::Drop,
        ErrorKind::ParseError => RetryDecision::OnceThenDrop,
        ErrorKind::RateLimited => RetryDecision::WaitForReset,
        ErrorKind::UpstreamUnavailable | ErrorKind::StoreConflict | ErrorKind::InternalError => {
            RetryDecision::Backoff
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default policy: 3 attempts with delays of 1s, 2s, 4s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self.base_delay.saturating_mul(multiplier).min(self.max_delay);
        let jitter_ms = rand::random::<u64>() % 250;
        base + Duration::from_millis(jitter_ms)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// What to do with a job given the error it just failed with and its
/// current attempt count.
#[derive(Debug)]
pub enum Disposition {
    RetryAfter(Duration),
    Dead,
}

/// Folds [`classify`] and [`RetryPolicy`] into a single decision for one
/// failed attempt.
pub fn disposition(err: &OrchError, attempt: u32, policy: &RetryPolicy) -> Disposition {
    match classify(err.kind()) {
        RetryDecision::Drop => Disposition::Dead,
        RetryDecision::OnceThenDrop => {
            if attempt <= 1 {
                Disposition::RetryAfter(policy.base_delay)
            } else {
                Disposition::Dead
            }
        }
        RetryDecision::WaitForReset => {
            let wait = err.retry_after_secs().unwrap_or(60).max(1) as u64;
            Disposition::RetryAfter(Duration::from_secs(wait))
        }
        RetryDecision::Backoff => {
            if policy.should_retry(attempt) {
                Disposition::RetryAfter(policy.delay_for_attempt(attempt))
            } else {
                Disposition::Dead
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_never_retry() {
        assert_eq!(classify(ErrorKind::BadRequest), RetryDecision::Drop);
        assert_eq!(classify(ErrorKind::ArtifactExpired), RetryDecision::Drop);
    }

    #[test]
    fn parser_errors_retry_once_then_drop() {
        assert_eq!(classify(ErrorKind::ParseError), RetryDecision::OnceThenDrop);
    }

    #[test]
    fn delay_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for_attempt(10);
        assert!(delay <= policy.max_delay + Duration::from_millis(250));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(3));
    }
}
