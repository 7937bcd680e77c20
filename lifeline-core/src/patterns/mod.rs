//! Resilience patterns for calls into the local service
//!
//! [`retry`] wraps a single call in bounded, backed-off retries. The
//! [`CircuitBreaker`] guards one dependency across calls.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerSnapshot,
    CircuitBreakerState,
};
pub use retry::{apply_jitter, retry, RetryConfig, RetryObserver, RetryPredicate};
