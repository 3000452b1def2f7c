//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker: Closed (normal operation), Open (failing
//! fast), Half-Open (testing recovery). State and counters are atomics so
//! the hot path never takes a lock; callers pre-flight with
//! [`CircuitBreaker::should_allow`] and report the outcome afterwards.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Lock-free counters backing [`CircuitBreakerMetrics`]
#[derive(Debug, Default)]
struct AtomicCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    half_open_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCounters {
    #[inline]
    fn record(&self, success: bool, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let failure_rate = if total_calls > 0 {
            failure_count as f64 / total_calls as f64
        } else {
            0.0
        };
        let average_duration = if success_count > 0 {
            Duration::from_nanos(total_duration_nanos / success_count)
        } else {
            Duration::ZERO
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            half_open_calls: self.half_open_calls.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            average_duration,
        }
    }
}

#[inline]
fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    counters: AtomicCounters,
    /// Epoch nanos when circuit was opened (0 = not open)
    opened_at_epoch_nanos: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: AtomicCounters::default(),
            opened_at_epoch_nanos: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pre-flight check: may a guarded call proceed right now?
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and
    /// lets the call through.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_nanos = self.opened_at_epoch_nanos.load(Ordering::Acquire);
                if opened_nanos == 0 {
                    warn!(component = %self.name, "Circuit open but no timestamp recorded");
                    return true;
                }

                let elapsed_nanos = epoch_nanos_now().saturating_sub(opened_nanos);
                if elapsed_nanos >= self.config.timeout.as_nanos() as u64 {
                    self.transition_to_half_open();
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let half_open_calls = self.counters.half_open_calls.load(Ordering::Relaxed);
                half_open_calls < self.config.success_threshold as u64
            }
        }
    }

    pub fn record_success(&self, duration: Duration) {
        self.counters.record(true, duration);

        match self.state() {
            CircuitState::HalfOpen => {
                let calls = self.counters.half_open_calls.fetch_add(1, Ordering::Relaxed) + 1;
                if calls >= self.config.success_threshold as u64 {
                    self.transition_to_closed();
                }
            }
            CircuitState::Closed => {
                self.counters
                    .consecutive_failures
                    .store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    pub fn record_failure(&self, duration: Duration) {
        self.counters.record(false, duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Guarded operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                let failures = self
                    .counters
                    .consecutive_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if failures >= self.config.failure_threshold as u64 {
                    self.transition_to_open();
                }
            }
            // Any failure while probing re-opens immediately
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self) {
        self.counters
            .consecutive_failures
            .store(0, Ordering::Relaxed);
        self.counters.half_open_calls.store(0, Ordering::Relaxed);
        self.opened_at_epoch_nanos.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);

        info!(
            component = %self.name,
            total_calls = self.counters.total_calls.load(Ordering::Relaxed),
            "Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self) {
        self.opened_at_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);
        self.counters.half_open_calls.store(0, Ordering::Relaxed);
        self.state.store(CircuitState::Open as u8, Ordering::Release);

        error!(
            component = %self.name,
            consecutive_failures = self.counters.consecutive_failures.load(Ordering::Relaxed),
            failure_threshold = self.config.failure_threshold,
            timeout_seconds = self.config.timeout.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.counters.half_open_calls.store(0, Ordering::Relaxed);
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (maintenance, emergency)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.transition_to_open();
    }

    /// Force circuit to closed state (emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.transition_to_closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.counters.snapshot(self.state())
    }
}
