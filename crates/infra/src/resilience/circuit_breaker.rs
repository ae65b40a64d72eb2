//! Circuit breaker for protecting a backend from cascading failures.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls fail fast until `recovery_timeout` has elapsed since the
//!   breaker tripped.
//! - **HalfOpen**: exactly one probe call is let through. Success closes the
//!   breaker, failure re-opens it for another full timeout.
//!
//! The first call to arrive after the timeout moves Open → HalfOpen but is
//! itself rejected with `AttemptingRecovery`; the call after that is the probe.
//!
//! The breaker never retries. Each `execute` is a single pass/fail decision;
//! pacing retries is the caller's job.
//!
//! One breaker instance guards one resource class and is shared by reference
//! between the services that use it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Rejected without running the operation.
    #[error("circuit '{name}' is open, retry after {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    /// Recovery window elapsed; the breaker moved to half-open and the next
    /// call will be the probe.
    #[error("circuit '{name}' is attempting recovery")]
    AttemptingRecovery { name: String },

    /// Another caller's probe is still running.
    #[error("circuit '{name}' is half-open with a probe in flight")]
    ProbeInFlight { name: String },

    #[error("operation failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// True for every variant where the operation was not run.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitBreakerError::Inner(_))
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_retry_time: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_retry_time: None,
            probe_in_flight: false,
        }
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl core::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(BreakerState::closed()),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_failure_time
    }

    /// Run `operation` under the breaker.
    ///
    /// The lock is only held while deciding admission and while recording the
    /// result, never while `operation` runs.
    pub fn execute<T, E, F>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(rejection) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(rejection);
            }
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };
        let result = operation();
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success(admission);
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                self.on_failure(admission);
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission, CircuitBreakerError<E>> {
        let now = self.clock.now();
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let next_retry = state.next_retry_time.unwrap_or(now);
                if now < next_retry {
                    let retry_after = (next_retry - now).to_std().unwrap_or(Duration::ZERO);
                    return Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_after,
                    });
                }
                info!(circuit = %self.name, "circuit breaker transitioning OPEN -> HALF_OPEN");
                state.state = CircuitState::HalfOpen;
                state.probe_in_flight = false;
                Err(CircuitBreakerError::AttemptingRecovery {
                    name: self.name.clone(),
                })
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    return Err(CircuitBreakerError::ProbeInFlight {
                        name: self.name.clone(),
                    });
                }
                state.probe_in_flight = true;
                Ok(Admission::Probe)
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut state = self.lock();

        match admission {
            Admission::Probe => {
                info!(circuit = %self.name, "circuit breaker transitioning HALF_OPEN -> CLOSED");
                *state = BreakerState::closed();
            }
            // A late success must not undo a trip caused by concurrent failures.
            Admission::Normal if state.state == CircuitState::Closed => {
                state.failure_count = 0;
            }
            Admission::Normal => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.last_failure_time = Some(now);
        state.failure_count = state.failure_count.saturating_add(1);

        match admission {
            Admission::Probe => {
                warn!(circuit = %self.name, "circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)");
                state.probe_in_flight = false;
                self.trip(&mut state, now);
            }
            Admission::Normal if state.state == CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "circuit breaker transitioning CLOSED -> OPEN"
                    );
                    self.trip(&mut state, now);
                }
            }
            Admission::Normal => {}
        }
    }

    fn trip(&self, state: &mut BreakerState, now: DateTime<Utc>) {
        let timeout = chrono::Duration::from_std(self.config.recovery_timeout)
            .unwrap_or(chrono::Duration::MAX);
        state.state = CircuitState::Open;
        state.next_retry_time = Some(
            now.checked_add_signed(timeout)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }

    /// Force the breaker back to closed (operator intervention).
    pub fn reset(&self) {
        info!(circuit = %self.name, "circuit breaker manually reset to CLOSED");
        *self.lock() = BreakerState::closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    // The state is plain counters, so a panic elsewhere cannot leave it
    // half-updated; keep using it after poisoning.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Settles a probe that unwinds before reporting, so the breaker cannot stay
/// half-open with a probe that will never finish.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(circuit = %self.breaker.name, "circuit breaker probe panicked");
            self.breaker.on_failure(Admission::Probe);
            self.breaker.total_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls rejected without running the operation.
    pub total_rejections: u64,
}
