//! Capabilities of the local service: probing it and starting it
//!
//! The resilience core never talks to the service directly. It only needs a
//! [`LivenessProbe`] and a [`Bootstrap`]; [`ServiceRecovery`] combines the two
//! into a recovery strategy.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::abstractions::time::{Clock, SystemClock};
use crate::config::{LifelineConfig, ServiceSettings};
use crate::error::{AppError, ErrorKind, LifelineResult};
use crate::patterns::CircuitBreaker;
use crate::recovery::strategy::{RecoveryStrategy, DEFAULT_COOLDOWN, DEFAULT_MAX_ATTEMPTS};
use crate::startup::StartupGate;

/// Header carrying the service's API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Strategy name for the built-in service recovery; matches the code of
/// service-unavailable errors so reporting one triggers it
pub const SERVICE_RECOVERY: &str = "SERVICE_CONNECTION_ERROR";

/// Cheap check that the service is up
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, timeout: Duration) -> LifelineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Started,
    AlreadyRunning,
}

/// Starts the service
#[async_trait]
pub trait Bootstrap: Send + Sync {
    async fn bootstrap(&self) -> LifelineResult<BootstrapOutcome>;
}

/// `GET` against the service's ping endpoint
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpLivenessProbe {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }

    pub fn from_settings(settings: &ServiceSettings) -> Self {
        Self::new(settings.ping_url.clone(), settings.api_key.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn probe(&self, timeout: Duration) -> LifelineResult<()> {
        let mut request = self.client.get(&self.url).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("Liveness probe to {} succeeded", self.url);
            Ok(())
        } else {
            Err(probe_status_error(&self.url, status.as_u16()))
        }
    }
}

/// Error for a ping that got an answer other than 2xx
///
/// 401/403 mean the service is up but rejects `service.api_key`; restarting
/// it will not help, so those are configuration errors.
pub fn probe_status_error(url: &str, status: u16) -> AppError {
    match status {
        401 | 403 => AppError::configuration(
            "service.api_key",
            format!("{} rejected the API key (HTTP {})", url, status),
        ),
        _ => AppError::service_unavailable(format!(
            "Liveness probe to {} returned HTTP {}",
            url, status
        )),
    }
    .with_status(status)
}

/// Starts the service as a child process
///
/// Idempotent while the child is alive: a second call reports
/// `AlreadyRunning` instead of spawning again.
pub struct CommandBootstrap {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandBootstrap {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    /// Build from `service.bootstrap_command` (program followed by arguments)
    pub fn from_settings(settings: &ServiceSettings) -> LifelineResult<Self> {
        let (program, args) = settings.bootstrap_command.split_first().ok_or_else(|| {
            AppError::configuration("service.bootstrap_command", "must name a program")
        })?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn is_running(&self) -> bool {
        let mut child = self.child.lock();
        match child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(_) => {
                *child = None;
                false
            }
            None => false,
        }
    }

    /// Kill the child if one is running
    pub async fn shutdown(&self) -> LifelineResult<()> {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            info!("Stopping {}", self.program);
            child.kill().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBootstrap")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish()
    }
}

#[async_trait]
impl Bootstrap for CommandBootstrap {
    async fn bootstrap(&self) -> LifelineResult<BootstrapOutcome> {
        let mut child = self.child.lock();

        if let Some(running) = child.as_mut() {
            match running.try_wait() {
                Ok(None) => {
                    debug!("{} already running", self.program);
                    return Ok(BootstrapOutcome::AlreadyRunning);
                }
                Ok(Some(status)) => {
                    warn!("{} exited with {}, starting again", self.program, status);
                    *child = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::invoke("bootstrap", e.into()))?;

        info!("Started {} (pid {:?})", self.program, spawned.id());
        *child = Some(spawned);
        Ok(BootstrapOutcome::Started)
    }
}

/// Built-in strategy: restart the service when its probe fails
///
/// The action bootstraps the service, then polls the probe until it answers
/// or the poll budget runs out. On success the guarded breaker is reset and
/// the startup gate is told the connection is back.
pub struct ServiceRecovery {
    name: String,
    probe: Arc<dyn LivenessProbe>,
    bootstrap: Arc<dyn Bootstrap>,
    breaker: Option<CircuitBreaker>,
    gate: Option<StartupGate>,
    clock: Arc<dyn Clock>,
    probe_timeout: Duration,
    poll_attempts: u32,
    poll_interval: Duration,
    max_attempts: u32,
    cooldown: Duration,
}

impl ServiceRecovery {
    pub fn new(probe: Arc<dyn LivenessProbe>, bootstrap: Arc<dyn Bootstrap>) -> Self {
        let settings = ServiceSettings::default();
        Self {
            name: SERVICE_RECOVERY.to_string(),
            probe,
            bootstrap,
            breaker: None,
            gate: None,
            clock: Arc::new(SystemClock::new()),
            probe_timeout: settings.probe_timeout,
            poll_attempts: settings.bootstrap_poll_attempts,
            poll_interval: settings.bootstrap_poll_interval,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Apply probe, poll and attempt settings from configuration
    pub fn with_config(mut self, config: &LifelineConfig) -> Self {
        self.probe_timeout = config.service.probe_timeout;
        self.poll_attempts = config.service.bootstrap_poll_attempts;
        self.poll_interval = config.service.bootstrap_poll_interval;
        self.max_attempts = config.recovery.max_attempts;
        self.cooldown = config.recovery.cooldown;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_gate(mut self, gate: StartupGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl RecoveryStrategy for ServiceRecovery {
    fn name(&self) -> &str {
        &self.name
    }

    async fn condition(&self) -> bool {
        match self.probe.probe(self.probe_timeout).await {
            Ok(()) => false,
            Err(e) if e.kind() == ErrorKind::Configuration => {
                warn!("Service is up but refuses the probe: {}", e);
                false
            }
            Err(e) => {
                debug!("Service probe failed: {}", e);
                if let Some(gate) = &self.gate {
                    gate.set_connection_established(false);
                }
                true
            }
        }
    }

    async fn action(&self) -> LifelineResult<bool> {
        let outcome = self.bootstrap.bootstrap().await?;
        debug!("Bootstrap outcome: {:?}", outcome);

        for poll in 1..=self.poll_attempts.max(1) {
            match self.probe.probe(self.probe_timeout).await {
                Ok(()) => {
                    info!("Service answered after {} probe(s)", poll);
                    if let Some(breaker) = &self.breaker {
                        breaker.reset();
                    }
                    if let Some(gate) = &self.gate {
                        gate.set_connection_established(true);
                    }
                    return Ok(true);
                }
                Err(e) if poll < self.poll_attempts => {
                    debug!("Service not up yet (probe {}): {}", poll, e);
                    self.clock.sleep(self.poll_interval).await;
                }
                Err(e) => {
                    warn!("Service still down after {} probes: {}", poll, e);
                }
            }
        }
        Ok(false)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
