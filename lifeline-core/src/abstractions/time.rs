//! Time abstractions for testability
//!
//! Cooldowns, reset timeouts and the dedup window all read time through the
//! [`Clock`] trait so tests can drive them deterministically. `SystemClock`
//! is backed by Tokio's clock, which means `tokio::time::pause` and
//! `advance` also move it; `MockClock` is advanced by hand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Instant in time (monotonic clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64); // Microseconds since the clock's origin

impl Instant {
    /// Create from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get microseconds value
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Duration since another instant (zero if `earlier` is later)
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Time elapsed between this instant and `now`
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.duration_since(*self)
    }

    pub fn saturating_add(&self, duration: Duration) -> Instant {
        Instant(self.0.saturating_add(duration.as_micros() as u64))
    }
}

/// Abstraction for time operations
#[async_trait]
pub trait Clock: Send + Sync {
    /// Get current instant (monotonic)
    fn now(&self) -> Instant;

    /// Sleep for a duration
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the Tokio timer
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    /// Create new instance
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemClock").finish()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.origin.elapsed().as_micros() as u64)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Mock clock for deterministic testing
///
/// Time only moves through [`advance`](MockClock::advance) or
/// [`set_time`](MockClock::set_time). Sleepers wake once the clock has been
/// advanced past their deadline.
#[derive(Clone, Default)]
pub struct MockClock {
    /// Current time in microseconds
    current_micros: Arc<AtomicU64>,
    /// Notify when time advances
    time_advanced: Arc<Notify>,
    /// Sleep durations requested so far, for assertions
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl MockClock {
    /// Create new mock clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with specific starting time
    pub fn with_time(micros: u64) -> Self {
        let clock = Self::new();
        clock.current_micros.store(micros, Ordering::SeqCst);
        clock
    }

    /// Advance time by duration
    pub fn advance(&self, duration: Duration) {
        self.current_micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
        self.time_advanced.notify_waiters();
    }

    /// Set absolute time
    pub fn set_time(&self, micros: u64) {
        self.current_micros.store(micros, Ordering::SeqCst);
        self.time_advanced.notify_waiters();
    }

    /// Every duration passed to `sleep`, in call order
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl std::fmt::Debug for MockClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClock")
            .field("current_micros", &self.current_micros.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.current_micros.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        let target = self.now().saturating_add(duration);

        loop {
            let notified = self.time_advanced.notified();
            tokio::pin!(notified);
            // Register before re-checking so an advance in between is not lost
            notified.as_mut().enable();

            if self.now() >= target {
                break;
            }
            notified.await;
        }
    }
}
