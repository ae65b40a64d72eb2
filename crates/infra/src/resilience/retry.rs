//! Optimistic-concurrency retry policy.
//!
//! A policy only re-runs an attempt that reported `Attempt::Conflict`. Any
//! other error ends the loop immediately and is handed back to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Backoff strategy between conflicting attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry straight away.
    Immediate,
    /// Fixed delay between retries
    Fixed,
    /// Linear backoff: base * attempt
    Linear,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) applied to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(5), Duration::from_millis(50))
    }
}

/// Result of one attempt under a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// Lost an optimistic-concurrency race; the attempt may be re-run on fresh state.
    Conflict,
}

/// How a retried operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Ok { value: T, attempts: u32 },
    /// The only allowed attempt conflicted.
    Conflict,
    /// Every one of several attempts conflicted.
    ExhaustedRetries { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, RetryOutcome::Ok { .. })
    }

    /// Attempts made before the loop ended.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Ok { attempts, .. } => *attempts,
            RetryOutcome::Conflict => 1,
            RetryOutcome::ExhaustedRetries { attempts } => *attempts,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Ok { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl RetryPolicy {
    /// A single attempt; a conflict is reported as `RetryOutcome::Conflict`.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Immediate,
            jitter: 0.0,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Attempts the policy will actually make (never fewer than one).
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Immediate => return Duration::ZERO,
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        // Deterministic jitter so runs are reproducible.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Run `attempt` until it completes, fails, or the budget is spent.
    ///
    /// The closure receives the 1-indexed attempt number.
    pub fn run<T, E, F>(&self, mut attempt: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(u32) -> Result<Attempt<T>, E>,
    {
        let max_attempts = self.effective_attempts();

        for n in 1..=max_attempts {
            match attempt(n)? {
                Attempt::Done(value) => {
                    return Ok(RetryOutcome::Ok { value, attempts: n });
                }
                Attempt::Conflict if n < max_attempts => {
                    let delay = self.delay_for_attempt(n);
                    debug!(
                        attempt = n,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "optimistic concurrency conflict, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Attempt::Conflict => {}
            }
        }

        if max_attempts == 1 {
            Ok(RetryOutcome::Conflict)
        } else {
            Ok(RetryOutcome::ExhaustedRetries {
                attempts: max_attempts,
            })
        }
    }
}
