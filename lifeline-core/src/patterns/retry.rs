//! Retry and backoff patterns for handling transient failures
//!
//! This module provides a bounded retry executor with exponential backoff
//! and multiplicative jitter. Attempts are strictly sequential: the next
//! attempt only starts after the previous one failed and its delay elapsed.

use crate::config::RetrySettings;
use crate::error::{is_transient, AppError, LifelineResult};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Lower bound of the multiplicative jitter factor
pub const JITTER_MIN: f64 = 0.75;
/// Upper bound of the multiplicative jitter factor
pub const JITTER_MAX: f64 = 1.25;

/// Decides whether a failed attempt should be retried
pub type RetryPredicate = Arc<dyn Fn(&AppError) -> bool + Send + Sync>;

/// Observer fired after every non-final failure, before the delay
pub type RetryObserver = Arc<dyn Fn(u32, &AppError) + Send + Sync>;

/// Configuration for retry operations
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for the un-jittered delay
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Apply ±25% jitter (helps avoid synchronized retry storms)
    pub jitter: bool,
    /// Function to determine if an error is retryable
    pub should_retry: RetryPredicate,
    /// Optional observer for retries
    pub on_retry: Option<RetryObserver>,
    /// Per-operation identifier for better observability
    pub operation_name: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            jitter: true,
            should_retry: Arc::new(is_transient),
            on_retry: None,
            operation_name: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<fn>"))
            .field("operation_name", &self.operation_name)
            .finish()
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            backoff_multiplier: settings.backoff_multiplier,
            jitter: settings.jitter,
            ..Default::default()
        }
    }
}

impl RetryConfig {
    /// Create an exponential backoff retry config
    pub fn exponential(attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Create a simple fixed delay retry config
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            ..Default::default()
        }
    }

    /// Retry config for calls into the local service's API
    pub fn for_service_calls(operation_name: &str) -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            operation_name: Some(operation_name.to_string()),
            ..Default::default()
        }
    }

    /// Retry config for starting the local service
    pub fn for_bootstrap(operation_name: &str) -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 1.8,
            operation_name: Some(operation_name.to_string()),
            should_retry: Arc::new(|e: &AppError| e.is_recoverable()),
            ..Default::default()
        }
    }

    /// Set operation name for better observability
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Replace the retryable error checker
    pub fn with_should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&AppError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Install an observer called after every non-final failure
    pub fn with_on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(u32, &AppError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Un-jittered delay after the given (1-based) failed attempt
    ///
    /// `min(initial_delay × backoff_multiplier^(attempt−1), max_delay)`
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        let max_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Delay to wait after the given failed attempt, jitter included
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.exponential_delay(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
            apply_jitter(base, factor)
        } else {
            base
        }
    }
}

/// Scale a delay by a jitter factor and floor it to whole milliseconds
pub fn apply_jitter(base: Duration, factor: f64) -> Duration {
    let jittered = (base.as_millis() as f64 * factor).floor().max(0.0);
    Duration::from_millis(jittered as u64)
}

/// Retry an async operation with the given configuration
///
/// Errors returned by `operation` are normalized into [`AppError`] at this
/// boundary. A failure the predicate rejects is returned as is; when the
/// final attempt fails, the last error is wrapped in a `RetryExhausted`
/// error carrying the attempt count.
pub async fn retry<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> LifelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<AppError>,
{
    let max_attempts = config.max_attempts.max(1);
    let operation_name = config.operation_name.as_deref().unwrap_or("operation");
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                let error: AppError = error.into();

                if !(config.should_retry)(&error) {
                    debug!("{}: error is not retryable: {}", operation_name, error);
                    return Err(error);
                }

                if attempt >= max_attempts {
                    warn!(
                        "{}: max retry attempts ({}) reached: {}",
                        operation_name, max_attempts, error
                    );
                    return Err(AppError::retry_exhausted(attempt, error));
                }

                if let Some(observer) = &config.on_retry {
                    observer(attempt, &error);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Retry attempt {}/{} for {} after error: {} (waiting {:?})",
                    attempt, max_attempts, operation_name, error, delay
                );

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(attempts: u32, delay_ms: u64) -> RetryConfig {
        RetryConfig::fixed(attempts, Duration::from_millis(delay_ms)).with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(no_jitter(3, 10), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, AppError>(count) }
        })
        .await
        .unwrap();

        assert_eq!(result, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(no_jitter(3, 10), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(AppError::network("Temporary failure"))
                } else {
                    Ok(count)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_exceeded_wraps_cause() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let err = retry(no_jitter(2, 10), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(AppError::service_unavailable("connection refused")) }
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert_eq!(err.context_value("attempts").and_then(|v| v.as_u64()), Some(2));
        assert_eq!(err.cause().map(|c| c.kind()), Some(ErrorKind::ServiceUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let err = retry(no_jitter(3, 10), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(AppError::validation("folder_id", "must not be empty")) }
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_performs_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let err = retry(no_jitter(1, 10), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(AppError::network("down")) }
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_errors_are_normalized() {
        let err = retry(no_jitter(2, 10), || async {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))
        })
        .await
        .unwrap_err();

        assert_eq!(err.root_cause().kind(), ErrorKind::ServiceUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_fires_for_non_final_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let config = no_jitter(3, 10).with_on_retry(move |attempt, error| {
            seen_clone.lock().push((attempt, error.code().to_string()));
        });

        let _ = retry(config, || async { Err::<(), _>(AppError::network("down")) }).await;

        assert_eq!(
            *seen.lock(),
            vec![(1, "NETWORK_ERROR".to_string()), (2, "NETWORK_ERROR".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_timing() {
        let start = tokio::time::Instant::now();
        let config = RetryConfig::exponential(3, Duration::from_millis(10), Duration::from_secs(1))
            .with_jitter(false);

        let _ = retry(config, || async { Err::<(), _>(AppError::network("Always fails")) }).await;

        let elapsed = start.elapsed();
        // Delays of 10ms and 20ms
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(40));
    }

    #[test]
    fn test_exponential_delay_caps_at_max() {
        let config = RetryConfig::exponential(10, Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(config.exponential_delay(1), Duration::from_millis(100));
        assert_eq!(config.exponential_delay(2), Duration::from_millis(200));
        assert_eq!(config.exponential_delay(4), Duration::from_millis(800));
        assert_eq!(config.exponential_delay(5), Duration::from_millis(1000));
        assert_eq!(config.exponential_delay(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_multiplier_one_is_constant() {
        let config = RetryConfig::exponential(5, Duration::from_millis(250), Duration::from_secs(10))
            .with_backoff_multiplier(1.0);
        for attempt in 1..=5 {
            assert_eq!(config.exponential_delay(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_apply_jitter_floors() {
        assert_eq!(apply_jitter(Duration::from_millis(101), 0.75), Duration::from_millis(75));
        assert_eq!(apply_jitter(Duration::from_millis(100), 1.25), Duration::from_millis(125));
    }

    proptest! {
        #[test]
        fn prop_jittered_delay_within_bounds(
            initial_ms in 1u64..5_000,
            max_ms in 1u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..20,
        ) {
            let config = RetryConfig::exponential(
                20,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
            )
            .with_backoff_multiplier(multiplier);

            let exponential = initial_ms as f64 * multiplier.powi(attempt as i32 - 1);
            let base = if exponential >= max_ms as f64 { max_ms as f64 } else { exponential.floor() };
            let delay = config.delay_for_attempt(attempt).as_millis() as f64;

            prop_assert!(delay <= base * JITTER_MAX);
            prop_assert!(delay >= (base * JITTER_MIN).floor());
        }

        #[test]
        fn prop_invocation_count(max_attempts in 1u32..6, succeed_on in 1u32..8) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let counter = Arc::new(AtomicU32::new(0));
            let counter_clone = counter.clone();
            let result = rt.block_on(retry(no_jitter(max_attempts, 5), move || {
                let attempt = counter_clone.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt >= succeed_on {
                        Ok(attempt)
                    } else {
                        Err(AppError::timeout("probe", Duration::from_millis(5)))
                    }
                }
            }));

            prop_assert_eq!(counter.load(Ordering::SeqCst), succeed_on.min(max_attempts));
            prop_assert_eq!(result.is_ok(), succeed_on <= max_attempts);
        }
    }
}
