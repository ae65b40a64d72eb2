//! Engine configuration.
//!
//! Defaults suit an embedded single-node deployment. `from_env` overrides
//! individual values; unset variables keep their defaults.

use std::time::Duration;

use anyhow::Context;

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::services::reservation::DEFAULT_RESERVATION_TTL_HOURS;

pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "STOCKGUARD_BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_RECOVERY_TIMEOUT_SECS: &str = "STOCKGUARD_BREAKER_RECOVERY_TIMEOUT_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "STOCKGUARD_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "STOCKGUARD_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "STOCKGUARD_RETRY_MAX_DELAY_MS";
pub const ENV_RESERVATION_TTL_HOURS: &str = "STOCKGUARD_RESERVATION_TTL_HOURS";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub reservation_ttl: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            reservation_ttl: chrono::Duration::hours(DEFAULT_RESERVATION_TTL_HOURS),
        }
    }
}

impl EngineConfig {
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reservation_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`, so tests need not touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(threshold) = parse::<u32>(&lookup, ENV_BREAKER_FAILURE_THRESHOLD)? {
            anyhow::ensure!(threshold > 0, "{ENV_BREAKER_FAILURE_THRESHOLD} must be at least 1");
            config.breaker = config.breaker.with_failure_threshold(threshold);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_BREAKER_RECOVERY_TIMEOUT_SECS)? {
            config.breaker = config
                .breaker
                .with_recovery_timeout(Duration::from_secs(secs));
        }
        if let Some(attempts) = parse::<u32>(&lookup, ENV_RETRY_MAX_ATTEMPTS)? {
            anyhow::ensure!(attempts > 0, "{ENV_RETRY_MAX_ATTEMPTS} must be at least 1");
            config.retry = config.retry.with_max_attempts(attempts);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_RETRY_BASE_DELAY_MS)? {
            config.retry = config.retry.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_RETRY_MAX_DELAY_MS)? {
            config.retry = config.retry.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(hours) = parse::<i64>(&lookup, ENV_RESERVATION_TTL_HOURS)? {
            config.reservation_ttl = chrono::Duration::try_hours(hours)
                .filter(|ttl| *ttl > chrono::Duration::zero())
                .with_context(|| format!("{ENV_RESERVATION_TTL_HOURS} out of range: {hours}"))?;
        }

        anyhow::ensure!(
            config.retry.base_delay <= config.retry.max_delay,
            "{ENV_RETRY_BASE_DELAY_MS} must not exceed {ENV_RETRY_MAX_DELAY_MS}"
        );

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
    }
}
