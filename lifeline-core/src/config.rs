//! Configuration for Lifeline
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `LIFELINE_*` environment variables. Every section is
//! `#[serde(default)]`, so a file only needs the keys it changes.
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! initial_delay = "500ms"
//!
//! [service]
//! ping_url = "http://127.0.0.1:8384/rest/system/ping"
//! api_key = "abc123"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, LifelineResult};

pub const DEFAULT_PING_URL: &str = "http://127.0.0.1:8384/rest/system/ping";

/// Root configuration structure for Lifeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifelineConfig {
    /// Default retry policy for service calls
    pub retry: RetrySettings,

    /// Thresholds for per-dependency circuit breakers
    pub circuit_breaker: CircuitBreakerSettings,

    /// Recovery scheduler configuration
    pub recovery: RecoverySettings,

    /// Toast classification and dedup
    pub notifications: NotificationSettings,

    /// Startup phase gate timings
    pub startup: StartupSettings,

    /// The local service being watched
    pub service: ServiceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first call
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Apply ±25% jitter to every delay
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,

    /// Time the circuit stays open after the last failure
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,

    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Interval between condition checks
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Attempts allowed before a strategy goes quiet
    pub max_attempts: u32,

    /// Minimum time between two attempts of the same strategy
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(10),
            max_attempts: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Identical errors inside this window are shown once
    #[serde(with = "humantime_serde")]
    pub dedup_window: Duration,

    /// Bound on the recent-errors map
    pub max_recent: usize,

    /// Message characters that take part in the dedup id
    pub id_prefix_len: usize,

    /// Auto-dismiss delay for non-critical toasts
    #[serde(with = "humantime_serde")]
    pub toast_duration: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_millis(5000),
            max_recent: 50,
            id_prefix_len: 50,
            toast_duration: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSettings {
    /// Time spent settling before the gate reports ready
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Gap between queued toasts when the queue is flushed
    #[serde(with = "humantime_serde")]
    pub flush_stagger: Duration,

    pub max_queued: usize,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1500),
            flush_stagger: Duration::from_millis(300),
            max_queued: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Liveness endpoint of the local service
    pub ping_url: String,

    /// Sent as `X-API-Key` when present
    pub api_key: Option<String>,

    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Program and arguments used to start the service
    pub bootstrap_command: Vec<String>,

    /// Probes to wait for after a bootstrap before giving up
    pub bootstrap_poll_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub bootstrap_poll_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            ping_url: DEFAULT_PING_URL.to_string(),
            api_key: None,
            probe_timeout: Duration::from_secs(5),
            bootstrap_command: vec![
                "syncthing".to_string(),
                "-no-browser".to_string(),
                "-no-restart".to_string(),
            ],
            bootstrap_poll_attempts: 10,
            bootstrap_poll_interval: Duration::from_secs(1),
        }
    }
}

impl LifelineConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> LifelineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::configuration(
                "config",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> LifelineResult<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load configuration from defaults and environment variables
    pub fn from_env() -> LifelineResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load file (when given), then environment, then validate
    pub fn load(path: Option<&Path>) -> LifelineResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from `LIFELINE_*` environment variables
    ///
    /// Durations are given in milliseconds.
    pub fn apply_env_overrides(&mut self) -> LifelineResult<()> {
        if let Some(v) = env_parse("LIFELINE_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env_millis("LIFELINE_RETRY_INITIAL_DELAY_MS")? {
            self.retry.initial_delay = v;
        }
        if let Some(v) = env_millis("LIFELINE_RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay = v;
        }
        if let Some(v) = env_parse("LIFELINE_RETRY_BACKOFF_MULTIPLIER")? {
            self.retry.backoff_multiplier = v;
        }
        if let Some(v) = env_parse("LIFELINE_RETRY_JITTER")? {
            self.retry.jitter = v;
        }

        if let Some(v) = env_parse("LIFELINE_BREAKER_FAILURE_THRESHOLD")? {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = env_millis("LIFELINE_BREAKER_RESET_TIMEOUT_MS")? {
            self.circuit_breaker.reset_timeout = v;
        }
        if let Some(v) = env_parse("LIFELINE_BREAKER_SUCCESS_THRESHOLD")? {
            self.circuit_breaker.success_threshold = v;
        }

        if let Some(v) = env_millis("LIFELINE_RECOVERY_INTERVAL_MS")? {
            self.recovery.monitor_interval = v;
        }
        if let Some(v) = env_parse("LIFELINE_RECOVERY_MAX_ATTEMPTS")? {
            self.recovery.max_attempts = v;
        }
        if let Some(v) = env_millis("LIFELINE_RECOVERY_COOLDOWN_MS")? {
            self.recovery.cooldown = v;
        }

        if let Ok(url) = std::env::var("LIFELINE_PING_URL") {
            self.service.ping_url = url;
        }
        if let Ok(key) = std::env::var("LIFELINE_API_KEY") {
            self.service.api_key = (!key.is_empty()).then_some(key);
        }
        if let Some(v) = env_millis("LIFELINE_PROBE_TIMEOUT_MS")? {
            self.service.probe_timeout = v;
        }
        if let Ok(command) = std::env::var("LIFELINE_BOOTSTRAP_COMMAND") {
            self.service.bootstrap_command =
                command.split_whitespace().map(str::to_string).collect();
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> LifelineResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(AppError::configuration(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(AppError::configuration(
                "retry.backoff_multiplier",
                "must be a finite value >= 1.0",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(AppError::configuration(
                "retry.initial_delay",
                "must not exceed retry.max_delay",
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::configuration(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(AppError::configuration(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }

        if self.recovery.monitor_interval < Duration::from_millis(100) {
            return Err(AppError::configuration(
                "recovery.monitor_interval",
                "too small (min 100ms)",
            ));
        }
        if self.recovery.max_attempts == 0 {
            return Err(AppError::configuration(
                "recovery.max_attempts",
                "must be at least 1",
            ));
        }

        if self.notifications.max_recent == 0 {
            return Err(AppError::configuration(
                "notifications.max_recent",
                "must be at least 1",
            ));
        }
        if self.notifications.id_prefix_len == 0 {
            return Err(AppError::configuration(
                "notifications.id_prefix_len",
                "must be at least 1",
            ));
        }

        if !self.service.ping_url.starts_with("http://")
            && !self.service.ping_url.starts_with("https://")
        {
            return Err(AppError::configuration(
                "service.ping_url",
                format!("not an http(s) URL: {}", self.service.ping_url),
            ));
        }
        if self.service.probe_timeout.is_zero() {
            return Err(AppError::configuration(
                "service.probe_timeout",
                "must be non-zero",
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> LifelineResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Configuration with short timings for tests
    pub fn test() -> Self {
        let mut config = Self::default();
        config.retry.initial_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(100);
        config.retry.jitter = false;
        config.recovery.monitor_interval = Duration::from_millis(100);
        config.service.bootstrap_poll_interval = Duration::from_millis(10);
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> LifelineResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::configuration(key, format!("invalid value '{}'", value))),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> LifelineResult<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
