use crate::constants;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Rejecting all requests until the cooldown elapses
    Open,
    /// Cooldown elapsed; letting probe requests through
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: constants::BREAKER_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(constants::BREAKER_COOLDOWN_SECS),
        }
    }
}

/// Consecutive-failure circuit breaker guarding one outbound dependency.
///
/// Opens after `failure_threshold` failures in a row, transitions to
/// half-open once the cooldown elapses, closes again on the first
/// half-open success. A failure while half-open re-opens immediately.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
    consecutive_failures: Arc<AtomicU32>,
    last_state_change: Arc<RwLock<Instant>>,
    total_requests: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(BreakerState::Closed)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            last_state_change: Arc::new(RwLock::new(Instant::now())),
            total_requests: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether a request may go out right now. Transitions Open → HalfOpen
    /// once the cooldown has elapsed.
    pub async fn should_allow_request(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let current = *self.state.read().await;
        match current {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let last_change = *self.last_state_change.read().await;
                if last_change.elapsed() >= self.config.cooldown {
                    self.transition(BreakerState::HalfOpen).await;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let current = *self.state.read().await;
        if current == BreakerState::HalfOpen {
            self.transition(BreakerState::Closed).await;
            info!("Circuit breaker closed, service recovered");
        }
    }

    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let current = *self.state.read().await;
        match current {
            BreakerState::Closed => {
                let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.failure_threshold {
                    self.transition(BreakerState::Open).await;
                    warn!(
                        consecutive_failures = count,
                        "Circuit breaker opened after repeated failures"
                    );
                }
            }
            // A probe failure re-opens; already-open stays open.
            BreakerState::HalfOpen => {
                self.transition(BreakerState::Open).await;
                warn!("Circuit breaker re-opened, probe request failed");
            }
            BreakerState::Open => {}
        }
    }

    async fn transition(&self, next: BreakerState) {
        let mut state = self.state.write().await;
        *state = next;
        *self.last_state_change.write().await = Instant::now();
        if next == BreakerState::Closed {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
    }

    pub async fn state(&self) -> BreakerState {
        *self.state.read().await
    }

    pub async fn metrics(&self) -> BreakerMetrics {
        let last_change = *self.last_state_change.read().await;
        BreakerMetrics {
            state: *self.state.read().await,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            last_state_change_seconds: last_change.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_state_change_seconds: u64,
}
