//! Circuit breaker keyed per `(installation, resource)` (design doc §4.1).
//!
//! Closed --[N consecutive failures]--> Open --[recovery_timeout elapses]--> HalfOpen
//!   ^                                                                          |
//!   +-----------------------------[probe succeeds]----------------------------+
//!   Open <--[probe fails]-- HalfOpen

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            half_open_calls: 0,
        }
    }
}

/// A circuit breaker registry, one entry per `(installation_ref, resource)`.
/// `resource` is a coarse category like `artifacts` or `check_runs` so one
/// noisy endpoint doesn't trip the breaker for unrelated calls.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    states: DashMap<(String, String), Arc<RwLock<CircuitBreakerState>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn entry(&self, installation: &str, resource: &str) -> Arc<RwLock<CircuitBreakerState>> {
        self.states
            .entry((installation.to_string(), resource.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(CircuitBreakerState::default())))
            .clone()
    }

    pub async fn call_allowed(&self, installation: &str, resource: &str) -> bool {
        let cell = self.entry(installation, resource);
        let mut state = cell.write().await;

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    info!(installation, resource, "circuit breaker half-open probe");
                    state.state = CircuitState::HalfOpen;
                    state.half_open_calls = 0;
                    true
                } else {
                    debug!(installation, resource, "circuit breaker open, rejecting call");
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_calls < self.config.half_open_max_calls {
                    state.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, installation: &str, resource: &str) {
        let cell = self.entry(installation, resource);
        let mut state = cell.write().await;
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!(installation, resource, "circuit breaker recovered, closing");
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.opened_at = None;
                state.half_open_calls = 0;
            }
            CircuitState::Open => {
                warn!(installation, resource, "success recorded while circuit open");
            }
        }
    }

    pub async fn record_failure(&self, installation: &str, resource: &str) {
        let cell = self.entry(installation, resource);
        let mut state = cell.write().await;
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    warn!(installation, resource, failures = state.failure_count, "circuit breaker opening");
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(installation, resource, "probe failed, circuit breaker reopening");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    #[cfg(test)]
    async fn current_state(&self, installation: &str, resource: &str) -> CircuitState {
        self.entry(installation, resource).read().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let reg = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        });
        for _ in 0..3 {
            reg.record_failure("inst-1", "artifacts").await;
        }
        assert_eq!(reg.current_state("inst-1", "artifacts").await, CircuitState::Open);
        assert!(!reg.call_allowed("inst-1", "artifacts").await);
    }

    #[tokio::test]
    async fn half_open_probe_then_close_on_success() {
        let reg = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(1),
            half_open_max_calls: 1,
        });
        reg.record_failure("inst-1", "check_runs").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(reg.call_allowed("inst-1", "check_runs").await);
        reg.record_success("inst-1", "check_runs").await;
        assert_eq!(reg.current_state("inst-1", "check_runs").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn independent_resources_are_isolated() {
        let reg = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        });
        reg.record_failure("inst-1", "artifacts").await;
        assert!(reg.call_allowed("inst-1", "check_runs").await);
    }
}
