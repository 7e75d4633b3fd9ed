//! Rate-budget accountant (design doc §4.1/§4.1a/§5).
//!
//! Tracks the remaining call budget and reset epoch per installation,
//! updated from every response the host client receives. Waiters observe
//! it under a lock, mirroring the design's "per-installation monotonic
//! counter updated by every response" shared-resource policy.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A snapshot of one installation's remaining call budget.
#[derive(Debug, Clone, Copy)]
pub struct RateBudget {
    pub remaining: i64,
    pub limit: i64,
    pub reset_at: i64,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            remaining: i64::MAX,
            limit: i64::MAX,
            reset_at: 0,
        }
    }
}

impl RateBudget {
    /// Fraction of the limit remaining, in `[0, 1]`.
    pub fn remaining_fraction(&self) -> f64 {
        if self.limit <= 0 {
            1.0
        } else {
            (self.remaining as f64 / self.limit as f64).clamp(0.0, 1.0)
        }
    }

    pub fn below_reserve(&self, reserve_percent: f64) -> bool {
        self.remaining_fraction() < reserve_percent
    }
}

/// Tracks [`RateBudget`] per installation.
#[derive(Default)]
pub struct RateBudgetTracker {
    budgets: DashMap<String, Arc<RwLock<RateBudget>>>,
}

impl RateBudgetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, installation: &str) -> Arc<RwLock<RateBudget>> {
        self.budgets
            .entry(installation.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(RateBudget::default())))
            .clone()
    }

    pub async fn update(&self, installation: &str, remaining: i64, limit: i64, reset_at: i64) {
        let cell = self.entry(installation);
        let mut budget = cell.write().await;
        *budget = RateBudget {
            remaining,
            limit,
            reset_at,
        };
    }

    pub async fn snapshot(&self, installation: &str) -> RateBudget {
        *self.entry(installation).read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_and_reports_budget_per_installation() {
        let tracker = RateBudgetTracker::new();
        tracker.update("inst-1", 100, 5000, 1700000000).await;
        tracker.update("inst-2", 4900, 5000, 1700000000).await;

        let b1 = tracker.snapshot("inst-1").await;
        let b2 = tracker.snapshot("inst-2").await;
        assert!(b1.below_reserve(0.1));
        assert!(!b2.below_reserve(0.1));
    }

    #[test]
    fn default_budget_never_blocks() {
        let b = RateBudget::default();
        assert!(!b.below_reserve(0.5));
    }
}
