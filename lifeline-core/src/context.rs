//! Application context
//!
//! Owns one instance of each resilience component and wires them together:
//! the startup gate fronts the sink, the recovery registry reports through
//! the gate, and the notification service triggers the registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::abstractions::time::{Clock, SystemClock};
use crate::config::LifelineConfig;
use crate::notification::{NotificationService, NotificationSink};
use crate::patterns::{CircuitBreaker, CircuitBreakerConfig};
use crate::recovery::AutoRecovery;
use crate::startup::StartupGate;

pub struct AppContext {
    config: LifelineConfig,
    clock: Arc<dyn Clock>,
    gate: StartupGate,
    recovery: Arc<AutoRecovery>,
    notifications: NotificationService,
    breakers: DashMap<String, CircuitBreaker>,
}

impl AppContext {
    /// Context reading time from the Tokio clock
    pub fn new(config: LifelineConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: LifelineConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = StartupGate::from_config(sink, &config, clock.clone());
        let recovery = Arc::new(AutoRecovery::with_clock(clock.clone(), Some(gate.clone())));
        let notifications = NotificationService::new(
            gate.clone(),
            recovery.clone(),
            clock.clone(),
            config.notifications.clone(),
        );

        Self {
            config,
            clock,
            gate,
            recovery,
            notifications,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LifelineConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn gate(&self) -> &StartupGate {
        &self.gate
    }

    pub fn recovery(&self) -> &Arc<AutoRecovery> {
        &self.recovery
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    /// Breaker guarding the named dependency, created on first use
    pub fn breaker(&self, name: &str) -> CircuitBreaker {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating circuit breaker '{}'", name);
                CircuitBreaker::with_clock(
                    name,
                    CircuitBreakerConfig::from(&self.config.circuit_breaker),
                    self.clock.clone(),
                )
            })
            .clone()
    }

    pub fn breaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Start the recovery loop at the configured interval
    pub fn start(&self) {
        self.recovery
            .start_monitoring(self.config.recovery.monitor_interval);
    }

    pub async fn shutdown(&self) {
        self.recovery.stop_monitoring().await;
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("gate", &self.gate)
            .field("recovery", &self.recovery)
            .field("breakers", &self.breaker_names())
            .finish()
    }
}
