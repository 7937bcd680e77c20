//! Circuit Breaker Pattern for Fault Tolerance
//!
//! The circuit breaker stops the client from repeatedly calling a dependency
//! that is likely to fail, shedding load while the dependency heals.
//!
//! ## Pattern Implementation
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, calls pass through. Failures increment the
//!   failure counter, successes decrement it (never below zero).
//! - **Open**: Calls are rejected immediately without running the operation,
//!   until `reset_timeout` has elapsed since the last failure.
//! - **Half-Open**: Calls are attempted. `success_threshold` successes close
//!   the circuit; a single failure reopens it.
//!
//! ## Usage Example
//!
//! ```rust
//! use std::time::Duration;
//! use lifeline_core::error::AppError;
//! use lifeline_core::patterns::CircuitBreakerBuilder;
//!
//! # async fn example() -> Result<(), AppError> {
//! let breaker = CircuitBreakerBuilder::new("syncthing-api")
//!     .failure_threshold(5)
//!     .reset_timeout(Duration::from_secs(30))
//!     .success_threshold(2)
//!     .build();
//!
//! let version = breaker
//!     .execute(|| async { Ok::<_, AppError>("v1.27.0".to_string()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::field::display;
use tracing::{debug, info, warn, Instrument};

use crate::abstractions::time::{Clock, Instant, SystemClock};
use crate::config::CircuitBreakerSettings;
use crate::error::{AppError, LifelineResult};
use crate::observability::breaker_span;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitBreakerState {
    /// Normal operation - calls pass through
    Closed,
    /// Failing fast - calls are rejected immediately
    Open,
    /// Testing if the dependency has recovered
    HalfOpen,
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures (net of successes) before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing again
    pub reset_timeout: Duration,
    /// Half-open successes required to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            reset_timeout: settings.reset_timeout,
            success_threshold: settings.success_threshold,
        }
    }
}

/// Point-in-time view of a breaker, as returned by [`CircuitBreaker::get_state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitBreakerState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Internal state for circuit breaker
#[derive(Debug)]
struct CircuitBreakerInternalState {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

impl CircuitBreakerInternalState {
    fn closed() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
        }
    }
}

/// Guards one logical dependency
///
/// Clones share state, so a breaker can be handed to the recovery strategy
/// that resets it and to every caller that routes through it.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    internal_state: Arc<Mutex<CircuitBreakerInternalState>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.get_state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker reading time from the Tokio clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock::new()))
    }

    /// Create a new circuit breaker with an injected clock
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            clock,
            internal_state: Arc::new(Mutex::new(CircuitBreakerInternalState::closed())),
        }
    }

    /// Execute an operation through the circuit breaker
    ///
    /// While open (and before `reset_timeout` has elapsed) the operation is
    /// never invoked and a `CircuitOpen` error is returned instead. Errors
    /// returned by the operation are normalized into [`AppError`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> LifelineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        let span = breaker_span(&self.name);
        let admitted = span.in_scope(|| self.should_allow_request());
        span.record("state", display(self.state()));

        if !admitted {
            span.in_scope(|| debug!("Circuit breaker '{}' rejected call", self.name));
            return Err(AppError::circuit_open(self.name.as_ref()));
        }

        let outcome = operation().instrument(span.clone()).await;

        span.in_scope(|| match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(error.into())
            }
        })
    }

    /// Check if a call should be allowed, moving open to half-open when due
    fn should_allow_request(&self) -> bool {
        let mut state = self.internal_state.lock();

        match state.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let now = self.clock.now();
                let elapsed = state
                    .last_failure_at
                    .map(|at| at.elapsed(now))
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.config.reset_timeout {
                    state.state = CircuitBreakerState::HalfOpen;
                    state.success_count = 0;
                    info!("Circuit breaker '{}' transitioning to half-open", self.name);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Handle successful operation
    fn on_success(&self) {
        let mut state = self.internal_state.lock();

        match state.state {
            CircuitBreakerState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitBreakerState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitBreakerState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    info!(
                        "Circuit breaker '{}' closing after {} successful calls",
                        self.name, self.config.success_threshold
                    );
                }
            }
            // A call admitted before another caller reopened the circuit
            CircuitBreakerState::Open => {}
        }
    }

    /// Handle failed operation
    fn on_failure(&self) {
        let mut state = self.internal_state.lock();
        state.failure_count += 1;
        state.last_failure_at = Some(self.clock.now());

        match state.state {
            CircuitBreakerState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitBreakerState::Open;
                    warn!(
                        "Circuit breaker '{}' opening after {} failures",
                        self.name, state.failure_count
                    );
                }
            }
            CircuitBreakerState::HalfOpen => {
                state.state = CircuitBreakerState::Open;
                state.success_count = 0;
                warn!(
                    "Circuit breaker '{}' reopening after failure in half-open state",
                    self.name
                );
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Current state and counters
    pub fn get_state(&self) -> CircuitBreakerSnapshot {
        let state = self.internal_state.lock();
        CircuitBreakerSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitBreakerState {
        self.internal_state.lock().state
    }

    /// Get the name of this circuit breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Force the circuit closed with zeroed counters (used by recovery)
    pub fn reset(&self) {
        let mut state = self.internal_state.lock();
        let previous = state.state;
        *state = CircuitBreakerInternalState::closed();
        info!("Circuit breaker '{}' reset (was {})", self.name, previous);
    }
}

/// Circuit breaker builder for easier configuration
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl CircuitBreakerBuilder {
    /// Create a new circuit breaker builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            clock: None,
        }
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Set the half-open successes required to close
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        match self.clock {
            Some(clock) => CircuitBreaker::with_clock(self.name, self.config, clock),
            None => CircuitBreaker::new(self.name, self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::time::MockClock;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn breaker(clock: &MockClock, failures: u32, reset: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreakerBuilder::new("test")
            .failure_threshold(failures)
            .reset_timeout(reset)
            .success_threshold(successes)
            .clock(Arc::new(clock.clone()))
            .build()
    }

    async fn fail(breaker: &CircuitBreaker) -> LifelineResult<i32> {
        breaker
            .execute(|| async { Err::<i32, _>(AppError::network("failure")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> LifelineResult<i32> {
        breaker.execute(|| async { Ok::<i32, AppError>(42) }).await
    }

    #[tokio::test]
    async fn test_closed_state_passes_calls() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 3, Duration::from_secs(30), 2);

        for _ in 0..5 {
            assert_eq!(succeed(&breaker).await.unwrap(), 42);
        }

        assert_eq!(
            breaker.get_state(),
            CircuitBreakerSnapshot {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_success_decrements_failure_count() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 3, Duration::from_secs(30), 2);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.get_state().failure_count, 1);

        // Interleaved success keeps the count below threshold
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 3, Duration::from_secs(30), 2);

        for i in 0..3 {
            assert!(fail(&breaker).await.is_err());
            if i < 2 {
                assert_eq!(breaker.state(), CircuitBreakerState::Closed);
            }
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        clock.advance(Duration::from_secs(29));
        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = invoked.clone();
        let err = breaker
            .execute(|| async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, AppError>(1)
            })
            .await
            .unwrap_err();

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert!(err.to_string().contains("Circuit breaker 'test' is open"));
    }

    #[tokio::test]
    async fn test_half_open_single_failure_reopens() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 2, Duration::from_secs(10), 2);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        clock.advance(Duration::from_secs(10));

        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        // Reset timeout restarts from the half-open failure
        clock.advance(Duration::from_secs(5));
        let err = succeed(&breaker).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn test_example_scenario() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 5, Duration::from_secs(30), 2);

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        clock.advance(Duration::from_secs(1));
        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = invoked.clone();
        let rejected = breaker
            .execute(|| async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, AppError>(0)
            })
            .await;
        assert!(rejected.is_err());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(30));
        assert_eq!(succeed(&breaker).await.unwrap(), 42);
        assert_eq!(
            breaker.get_state(),
            CircuitBreakerSnapshot {
                state: CircuitBreakerState::HalfOpen,
                failure_count: 5,
                success_count: 1,
            }
        );

        assert_eq!(succeed(&breaker).await.unwrap(), 42);
        assert_eq!(
            breaker.get_state(),
            CircuitBreakerSnapshot {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 1, Duration::from_secs(60), 2);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let shared = breaker.clone();
        shared.reset();
        assert_eq!(breaker.get_state().failure_count, 0);
        assert_eq!(succeed(&breaker).await.unwrap(), 42);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transitions_are_logged() {
        let clock = MockClock::new();
        let breaker = breaker(&clock, 1, Duration::from_secs(1), 1);

        let _ = fail(&breaker).await;
        clock.advance(Duration::from_secs(1));
        let _ = succeed(&breaker).await;

        assert!(logs_contain("opening after 1 failures"));
        assert!(logs_contain("transitioning to half-open"));
        assert!(logs_contain("closing after 1 successful calls"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_calls_run_inside_breaker_span() {
        let clock = MockClock::new();
        let breaker = CircuitBreakerBuilder::new("api")
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(60))
            .clock(Arc::new(clock.clone()))
            .build();

        breaker
            .execute(|| async {
                tracing::info!("calling the service");
                Ok::<_, AppError>(())
            })
            .await
            .unwrap();
        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;

        assert!(logs_contain("breaker=api"));
        assert!(logs_contain("state=closed"));
        assert!(logs_contain("calling the service"));
        assert!(logs_contain("state=open"));
        assert!(logs_contain("rejected call"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_clock_uses_tokio_time() {
        let breaker = CircuitBreakerBuilder::new("tokio")
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(30))
            .success_threshold(1)
            .build();

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(succeed(&breaker).await.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }
}
