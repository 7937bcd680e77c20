use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::toast::{Toast, ToastAction, ToastDuration, ToastKind, ToastOptions};
use crate::abstractions::time::{Clock, Instant};
use crate::config::NotificationSettings;
use crate::error::{AppError, ErrorKind, LifelineResult};
use crate::recovery::AutoRecovery;
use crate::startup::{StartupGate, ToastOutcome};

/// Re-runnable operation behind a toast's retry button
pub type RetryAction = Arc<dyn Fn() -> BoxFuture<'static, LifelineResult<()>> + Send + Sync>;

/// Options for [`NotificationService::notify`]
#[derive(Clone)]
pub struct NotifyOptions {
    /// Run the recovery strategy registered under the error's code
    pub auto_recover: bool,
    pub retry_action: Option<RetryAction>,
    pub title: Option<String>,
    /// Queue the toast if startup suppresses it
    pub queueable: bool,
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self {
            auto_recover: true,
            retry_action: None,
            title: None,
            queueable: false,
        }
    }
}

impl fmt::Debug for NotifyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyOptions")
            .field("auto_recover", &self.auto_recover)
            .field("retry_action", &self.retry_action.as_ref().map(|_| "<fn>"))
            .field("title", &self.title)
            .field("queueable", &self.queueable)
            .finish()
    }
}

impl NotifyOptions {
    pub fn without_auto_recover(mut self) -> Self {
        self.auto_recover = false;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn queueable(mut self) -> Self {
        self.queueable = true;
        self
    }

    pub fn with_retry<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifelineResult<()>> + Send + 'static,
    {
        self.retry_action = Some(Arc::new(move || action().boxed()));
        self
    }
}

/// Dedup record for a reported error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub id: String,
    pub code: String,
    pub severity: ToastKind,
    /// When the error was created
    pub occurred_at: DateTime<Utc>,
    #[serde(skip)]
    pub recorded_at: Instant,
    pub recovered: bool,
    /// A toast was shown or queued for it
    pub notified: bool,
}

/// Recent events in insertion order, bounded
#[derive(Default)]
struct EventLog {
    order: VecDeque<String>,
    events: HashMap<String, ErrorEvent>,
}

impl EventLog {
    fn insert(&mut self, event: ErrorEvent, max: usize) {
        if self.events.insert(event.id.clone(), event.clone()).is_some() {
            self.order.retain(|id| id != &event.id);
        }
        self.order.push_back(event.id);

        while self.order.len() > max {
            if let Some(oldest) = self.order.pop_front() {
                self.events.remove(&oldest);
            }
        }
    }
}

struct ServiceInner {
    gate: StartupGate,
    recovery: Arc<AutoRecovery>,
    clock: Arc<dyn Clock>,
    settings: NotificationSettings,
    log: Mutex<EventLog>,
    retry_actions: Mutex<HashMap<String, RetryAction>>,
}

/// Classifies, deduplicates and surfaces failures
///
/// Toasts go out through the [`StartupGate`], so everything reported here
/// obeys startup suppression.
#[derive(Clone)]
pub struct NotificationService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationService")
            .field("recent_events", &self.inner.log.lock().order.len())
            .finish()
    }
}

/// Severity for an error toast
pub fn classify_severity(error: &AppError) -> ToastKind {
    if !error.is_recoverable() {
        return ToastKind::Critical;
    }
    match error.root_cause().kind() {
        ErrorKind::Network | ErrorKind::ServiceUnavailable | ErrorKind::Timeout => {
            return ToastKind::Warning
        }
        ErrorKind::Validation => return ToastKind::Info,
        _ => {}
    }
    match error.status_code() {
        Some(status) if status >= 500 => ToastKind::Error,
        _ => ToastKind::Warning,
    }
}

impl NotificationService {
    pub fn new(
        gate: StartupGate,
        recovery: Arc<AutoRecovery>,
        clock: Arc<dyn Clock>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                gate,
                recovery,
                clock,
                settings,
                log: Mutex::new(EventLog::default()),
                retry_actions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Dedup key: code plus the first `id_prefix_len` characters of the message
    pub fn event_id(&self, error: &AppError) -> String {
        let prefix: String = error
            .message()
            .chars()
            .take(self.inner.settings.id_prefix_len)
            .collect();
        format!("{}:{}", error.code(), prefix)
    }

    /// Report an error; returns its notification id
    ///
    /// A repeat inside the dedup window is dropped and returns the same id.
    /// Auto-recovery, when it applies, runs in the background.
    pub fn notify(&self, error: &AppError, options: NotifyOptions) -> String {
        let (id, strategy) = self.record_and_show(error, &options);

        if let Some(code) = strategy {
            match Handle::try_current() {
                Ok(handle) => {
                    let service = self.clone();
                    let id = id.clone();
                    handle.spawn(async move {
                        service.run_auto_recovery(&id, &code).await;
                    });
                }
                Err(_) => debug!("No runtime available, skipping auto-recovery for {}", id),
            }
        }
        id
    }

    /// Like [`notify`](Self::notify) but waits for auto-recovery to finish
    pub async fn notify_and_recover(&self, error: &AppError, options: NotifyOptions) -> String {
        let (id, strategy) = self.record_and_show(error, &options);
        if let Some(code) = strategy {
            self.run_auto_recovery(&id, &code).await;
        }
        id
    }

    /// Strategy registered for the error's code, or failing that for the
    /// code of its root cause (`RETRY_EXHAUSTED` wraps the real failure)
    pub fn recovery_strategy_for(&self, error: &AppError) -> Option<String> {
        [error.code(), error.root_cause().code()]
            .into_iter()
            .find(|code| self.inner.recovery.has_strategy(code))
            .map(str::to_string)
    }

    fn record_and_show(
        &self,
        error: &AppError,
        options: &NotifyOptions,
    ) -> (String, Option<String>) {
        let id = self.event_id(error);
        let now = self.inner.clock.now();
        let severity = classify_severity(error);

        {
            let mut log = self.inner.log.lock();
            if let Some(existing) = log.events.get(&id) {
                if existing.recorded_at.elapsed(now) < self.inner.settings.dedup_window {
                    debug!("Suppressing duplicate notification {}", id);
                    return (id, None);
                }
            }
            log.insert(
                ErrorEvent {
                    id: id.clone(),
                    code: error.code().to_string(),
                    severity,
                    occurred_at: error.timestamp(),
                    recorded_at: now,
                    recovered: false,
                    notified: false,
                },
                self.inner.settings.max_recent,
            );
        }

        let duration = match severity {
            ToastKind::Critical => ToastDuration::Persistent,
            _ => ToastDuration::AutoDismiss(self.inner.settings.toast_duration),
        };
        let mut toast = Toast::new(severity, error.user_message(), duration);
        toast.title = options.title.clone();

        if let Some(action) = &options.retry_action {
            if error.is_recoverable() {
                self.inner.retry_actions.lock().insert(id.clone(), action.clone());
                toast = toast.with_action(ToastAction {
                    label: "Retry".to_string(),
                    notification_id: id.clone(),
                });
            }
        }

        let outcome = self.inner.gate.submit(toast, options.queueable);
        if outcome != ToastOutcome::Suppressed {
            if let Some(event) = self.inner.log.lock().events.get_mut(&id) {
                event.notified = true;
            }
        }
        warn!("{} ({}): {}", severity, id, error);

        let strategy = if options.auto_recover && error.is_recoverable() {
            self.recovery_strategy_for(error)
        } else {
            None
        };
        (id, strategy)
    }

    async fn run_auto_recovery(&self, id: &str, code: &str) {
        if self.inner.recovery.trigger_recovery(code).await {
            self.mark_recovered(id);
            info!("Auto-recovery resolved {}", id);
        } else {
            debug!("Auto-recovery for {} did not succeed", id);
        }
    }

    /// Re-run the retry action attached to a notification
    ///
    /// Returns `Ok(false)` when no action is registered for `id`.
    pub async fn invoke_retry(&self, id: &str) -> LifelineResult<bool> {
        let action = self.inner.retry_actions.lock().get(id).cloned();
        let Some(action) = action else {
            return Ok(false);
        };

        action().await?;
        self.inner.retry_actions.lock().remove(id);
        self.mark_recovered(id);
        info!("Manual retry resolved {}", id);
        Ok(true)
    }

    fn mark_recovered(&self, id: &str) {
        if let Some(event) = self.inner.log.lock().events.get_mut(id) {
            event.recovered = true;
        }
    }

    pub fn event(&self, id: &str) -> Option<ErrorEvent> {
        self.inner.log.lock().events.get(id).cloned()
    }

    /// Recorded events, oldest first
    pub fn recent_events(&self) -> Vec<ErrorEvent> {
        let log = self.inner.log.lock();
        log.order
            .iter()
            .filter_map(|id| log.events.get(id).cloned())
            .collect()
    }

    pub fn clear(&self) {
        let mut log = self.inner.log.lock();
        log.order.clear();
        log.events.clear();
        self.inner.retry_actions.lock().clear();
    }

    pub fn success(&self, message: impl Into<String>) -> ToastOutcome {
        self.inner.gate.success(message, ToastOptions::default())
    }

    pub fn warning(&self, message: impl Into<String>) -> ToastOutcome {
        self.inner.gate.warning(message, ToastOptions::default())
    }

    pub fn info(&self, message: impl Into<String>) -> ToastOutcome {
        self.inner.gate.info(message, ToastOptions::default())
    }
}
