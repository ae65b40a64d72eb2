//! Resilience primitives: the circuit breaker and the conflict retry policy.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, CircuitState,
};
pub use retry::{Attempt, BackoffStrategy, RetryOutcome, RetryPolicy};
