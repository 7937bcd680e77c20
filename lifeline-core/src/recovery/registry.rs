use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use super::strategy::RecoveryStrategy;
use crate::abstractions::time::{Clock, Instant, SystemClock};
use crate::notification::toast::ToastOptions;
use crate::observability::recovery_span;
use crate::startup::StartupGate;

/// Default interval between condition checks
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Recovery bookkeeping for one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryState {
    /// Failed attempts since the last success (or the last quiet-period reset)
    pub attempts: u32,
    pub last_attempt: Option<Instant>,
    pub last_success: Option<Instant>,
    pub is_recovering: bool,
}

#[derive(Debug, Default)]
struct Counters {
    attempts: u32,
    last_attempt: Option<Instant>,
    last_success: Option<Instant>,
}

struct StrategyEntry {
    strategy: Arc<dyn RecoveryStrategy>,
    /// At most one execution in flight; claimed with compare-exchange
    recovering: AtomicBool,
    counters: Mutex<Counters>,
}

struct MonitorTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Registry and scheduler for recovery strategies
///
/// Each strategy is evaluated independently on every tick: it is skipped
/// while running, while inside its cooldown, and once it has used up its
/// attempt budget until a quiet period of twice the cooldown has passed.
pub struct AutoRecovery {
    strategies: RwLock<HashMap<String, Arc<StrategyEntry>>>,
    clock: Arc<dyn Clock>,
    notifier: Option<StartupGate>,
    monitor: Mutex<Option<MonitorTask>>,
}

impl AutoRecovery {
    /// Registry without notifications, reading time from the Tokio clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()), None)
    }

    /// Registry that reports outcomes through the startup gate
    pub fn with_clock(clock: Arc<dyn Clock>, notifier: Option<StartupGate>) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            clock,
            notifier,
            monitor: Mutex::new(None),
        }
    }

    /// Register a strategy, replacing (and resetting) any with the same name
    pub fn register(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let name = strategy.name().to_string();
        let entry = Arc::new(StrategyEntry {
            strategy,
            recovering: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
        });

        if self.strategies.write().insert(name.clone(), entry).is_some() {
            info!("Replaced recovery strategy '{}'", name);
        } else {
            info!("Registered recovery strategy '{}'", name);
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.strategies.write().remove(name).is_some();
        if removed {
            info!("Unregistered recovery strategy '{}'", name);
        }
        removed
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.read().contains_key(name)
    }

    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_state(&self, name: &str) -> Option<RecoveryState> {
        let entry = self.entry(name)?;
        let counters = entry.counters.lock();
        Some(RecoveryState {
            attempts: counters.attempts,
            last_attempt: counters.last_attempt,
            last_success: counters.last_success,
            is_recovering: entry.recovering.load(Ordering::Acquire),
        })
    }

    fn entry(&self, name: &str) -> Option<Arc<StrategyEntry>> {
        self.strategies.read().get(name).cloned()
    }

    /// Start the periodic check loop on the current runtime
    ///
    /// Has no effect if monitoring is already running.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            debug!("Recovery monitoring already running");
            return;
        }

        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let registry = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Recovery monitoring shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.run_checks().await;
                    }
                }
            }
        });

        *monitor = Some(MonitorTask {
            shutdown_tx,
            handle,
        });
        info!("Recovery monitoring started (interval {:?})", interval);
    }

    /// Stop the check loop and wait for it to exit
    ///
    /// A recovery action already running is allowed to finish first.
    pub async fn stop_monitoring(&self) {
        let task = self.monitor.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(()).await;
            if let Err(e) = task.handle.await {
                warn!("Recovery monitor task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Run one scheduling pass over every registered strategy
    pub async fn run_checks(&self) {
        let entries: Vec<Arc<StrategyEntry>> = self.strategies.read().values().cloned().collect();
        join_all(entries.iter().map(|entry| self.check_strategy(entry))).await;
    }

    async fn check_strategy(&self, entry: &StrategyEntry) {
        let name = entry.strategy.name();

        if entry.recovering.load(Ordering::Acquire) {
            debug!("Recovery '{}' still running, skipping", name);
            return;
        }

        let cooldown = entry.strategy.cooldown();
        let max_attempts = entry.strategy.max_attempts();
        let now = self.clock.now();
        {
            let mut counters = entry.counters.lock();
            if let Some(last_attempt) = counters.last_attempt {
                let elapsed = last_attempt.elapsed(now);
                if elapsed < cooldown {
                    return;
                }
                if counters.attempts >= max_attempts {
                    if elapsed <= cooldown.saturating_mul(2) {
                        return;
                    }
                    info!(
                        "Recovery '{}' quiet period over, resetting attempt budget",
                        name
                    );
                    counters.attempts = 0;
                }
            }
        }

        if entry.strategy.condition().await {
            self.execute(entry).await;
        }
    }

    /// Run a strategy now, skipping condition and cooldown checks
    ///
    /// Returns `false` without running anything when the strategy is unknown
    /// or already in flight; otherwise whether the action succeeded.
    pub async fn trigger_recovery(&self, name: &str) -> bool {
        let Some(entry) = self.entry(name) else {
            warn!("No recovery strategy registered as '{}'", name);
            return false;
        };
        self.execute(&entry).await
    }

    async fn execute(&self, entry: &StrategyEntry) -> bool {
        if entry
            .recovering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                "Recovery '{}' already in flight, not starting another",
                entry.strategy.name()
            );
            return false;
        }
        let _running = scopeguard::guard(&entry.recovering, |flag| {
            flag.store(false, Ordering::Release);
        });

        let name = entry.strategy.name();
        let attempt = {
            let mut counters = entry.counters.lock();
            counters.attempts += 1;
            counters.last_attempt = Some(self.clock.now());
            counters.attempts
        };

        let span = recovery_span(name, attempt);
        info!(parent: &span, "Running recovery '{}' (attempt {})", name, attempt);

        match entry.strategy.action().instrument(span.clone()).await {
            Ok(true) => {
                {
                    let mut counters = entry.counters.lock();
                    counters.last_success = Some(self.clock.now());
                    counters.attempts = 0;
                }
                span.record("outcome", "recovered");
                info!(parent: &span, "Recovery '{}' succeeded", name);
                if let Some(gate) = &self.notifier {
                    gate.success(
                        format!("Recovered from {}", describe(name)),
                        ToastOptions::queueable().with_title("Connection restored"),
                    );
                }
                true
            }
            outcome => {
                match outcome {
                    Err(e) => warn!(parent: &span, "Recovery '{}' failed: {}", name, e),
                    _ => warn!(parent: &span, "Recovery '{}' did not succeed", name),
                }
                span.record("outcome", "failed");

                let max_attempts = entry.strategy.max_attempts();
                if attempt >= max_attempts {
                    warn!(
                        "Recovery '{}' exhausted {} attempts, giving up until quiet period ends",
                        name, max_attempts
                    );
                    if let Some(gate) = &self.notifier {
                        gate.error(
                            format!(
                                "Automatic recovery from {} failed after {} attempts",
                                describe(name),
                                attempt
                            ),
                            ToastOptions::default().with_title("Recovery failed"),
                        );
                    }
                }
                false
            }
        }
    }
}

impl Default for AutoRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AutoRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRecovery")
            .field("strategies", &self.strategy_names())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

/// Human-readable name for strategy keys like `SERVICE_CONNECTION_ERROR`
fn describe(name: &str) -> String {
    name.to_lowercase().replace('_', " ")
}
