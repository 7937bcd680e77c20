//! Startup phase gate
//!
//! While the application is still starting, most toasts are noise: the local
//! service is expected to be unreachable for a few seconds. The gate tracks
//! the startup phase and decides per toast whether to show it, queue it for
//! later, or drop it.
//!
//! ```text
//! initializing ─► connecting ─► (onboarding) ─► settling ──1.5s──► ready
//! ```
//!
//! | Phase                                 | Shown                       |
//! |---------------------------------------|-----------------------------|
//! | initializing, connecting, onboarding  | error, critical             |
//! | settling                              | warning, error, critical    |
//! | ready                                 | everything                  |
//!
//! Suppressed toasts marked queueable are flushed one by one once the gate
//! reaches `ready`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::abstractions::time::{Clock, SystemClock};
use crate::config::{LifelineConfig, StartupSettings};
use crate::notification::toast::{
    NotificationSink, Toast, ToastDuration, ToastKind, ToastOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupPhase {
    Initializing,
    Connecting,
    Onboarding,
    Settling,
    Ready,
}

impl StartupPhase {
    /// Whether a non-error toast of this kind may be shown in this phase
    fn allows(self, kind: ToastKind) -> bool {
        match self {
            StartupPhase::Initializing | StartupPhase::Connecting | StartupPhase::Onboarding => {
                false
            }
            StartupPhase::Settling => kind >= ToastKind::Warning,
            StartupPhase::Ready => true,
        }
    }
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartupPhase::Initializing => "initializing",
            StartupPhase::Connecting => "connecting",
            StartupPhase::Onboarding => "onboarding",
            StartupPhase::Settling => "settling",
            StartupPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// What the gate did with a toast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastOutcome {
    Shown(Uuid),
    Queued(Uuid),
    Suppressed,
}

impl ToastOutcome {
    pub fn is_shown(&self) -> bool {
        matches!(self, ToastOutcome::Shown(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupSnapshot {
    pub phase: StartupPhase,
    pub is_onboarding_active: bool,
    pub connection_established: bool,
    pub queued_toasts: usize,
}

struct GateState {
    phase: StartupPhase,
    onboarding_active: bool,
    connection_established: bool,
    queue: VecDeque<Toast>,
    /// Bumped on every transition; a pending auto-ready only fires if unchanged
    generation: u64,
}

struct GateInner {
    state: Mutex<GateState>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: StartupSettings,
    toast_duration: Duration,
}

/// Phase-aware front door for every toast
#[derive(Clone)]
pub struct StartupGate {
    inner: Arc<GateInner>,
}

impl fmt::Debug for StartupGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupGate")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl StartupGate {
    /// Gate with default timings, reading time from the Tokio clock
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_clock(
            sink,
            StartupSettings::default(),
            Duration::from_secs(5),
            Arc::new(SystemClock::new()),
        )
    }

    pub fn from_config(
        sink: Arc<dyn NotificationSink>,
        config: &LifelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_clock(
            sink,
            config.startup.clone(),
            config.notifications.toast_duration,
            clock,
        )
    }

    pub fn with_clock(
        sink: Arc<dyn NotificationSink>,
        settings: StartupSettings,
        toast_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    phase: StartupPhase::Initializing,
                    onboarding_active: false,
                    connection_established: false,
                    queue: VecDeque::new(),
                    generation: 0,
                }),
                sink,
                clock,
                settings,
                toast_duration,
            }),
        }
    }

    pub fn phase(&self) -> StartupPhase {
        self.inner.state.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == StartupPhase::Ready
    }

    pub fn snapshot(&self) -> StartupSnapshot {
        let state = self.inner.state.lock();
        StartupSnapshot {
            phase: state.phase,
            is_onboarding_active: state.onboarding_active,
            connection_established: state.connection_established,
            queued_toasts: state.queue.len(),
        }
    }

    /// Move to `phase` explicitly
    ///
    /// Entering `settling` schedules the move to `ready`; entering `ready`
    /// flushes the queue.
    pub fn set_phase(&self, phase: StartupPhase) {
        let mut state = self.inner.state.lock();
        let flushed = self.transition(&mut state, phase);
        drop(state);
        self.flush(flushed);
    }

    /// Tell the gate a first-run tutorial started or finished
    pub fn set_onboarding_active(&self, active: bool) {
        let mut state = self.inner.state.lock();
        if state.onboarding_active == active {
            return;
        }
        state.onboarding_active = active;

        let next = if active {
            Some(StartupPhase::Onboarding)
        } else if state.phase == StartupPhase::Onboarding {
            Some(if state.connection_established {
                StartupPhase::Settling
            } else {
                StartupPhase::Connecting
            })
        } else {
            None
        };

        let flushed = match next {
            Some(phase) => self.transition(&mut state, phase),
            None => Vec::new(),
        };
        drop(state);
        self.flush(flushed);
    }

    /// Tell the gate whether the local service answers
    pub fn set_connection_established(&self, established: bool) {
        let mut state = self.inner.state.lock();
        if state.connection_established == established {
            return;
        }
        state.connection_established = established;

        let next = match (established, state.phase) {
            (true, StartupPhase::Initializing | StartupPhase::Connecting)
                if !state.onboarding_active =>
            {
                Some(StartupPhase::Settling)
            }
            // Losing the connection while settling restarts the wait
            (false, StartupPhase::Settling) => Some(StartupPhase::Connecting),
            _ => None,
        };

        let flushed = match next {
            Some(phase) => self.transition(&mut state, phase),
            None => Vec::new(),
        };
        drop(state);
        self.flush(flushed);
    }

    /// Apply a transition; returns queued toasts to flush when reaching ready
    fn transition(&self, state: &mut GateState, phase: StartupPhase) -> Vec<Toast> {
        if state.phase == phase {
            return Vec::new();
        }

        info!("Startup phase {} -> {}", state.phase, phase);
        state.phase = phase;
        state.generation = state.generation.wrapping_add(1);

        match phase {
            StartupPhase::Settling => {
                if self.schedule_ready(state.generation) {
                    Vec::new()
                } else {
                    debug!("No runtime available, skipping settle delay");
                    state.phase = StartupPhase::Ready;
                    state.queue.drain(..).collect()
                }
            }
            StartupPhase::Ready => state.queue.drain(..).collect(),
            _ => Vec::new(),
        }
    }

    /// Spawn the settle timer; false when there is no runtime to run it on
    fn schedule_ready(&self, generation: u64) -> bool {
        let Ok(handle) = Handle::try_current() else {
            return false;
        };

        let gate = self.clone();
        let delay = self.inner.settings.settle_delay;
        handle.spawn(async move {
            gate.inner.clock.sleep(delay).await;

            let mut state = gate.inner.state.lock();
            if state.generation != generation || state.phase != StartupPhase::Settling {
                debug!("Settling interrupted, not advancing to ready");
                return;
            }
            let flushed = gate.transition(&mut state, StartupPhase::Ready);
            drop(state);
            gate.flush(flushed);
        });
        true
    }

    /// Deliver queued toasts one `flush_stagger` apart
    fn flush(&self, toasts: Vec<Toast>) {
        if toasts.is_empty() {
            return;
        }
        debug!("Flushing {} queued toasts", toasts.len());

        let Ok(handle) = Handle::try_current() else {
            for toast in &toasts {
                self.inner.sink.show(toast);
            }
            return;
        };

        let inner = self.inner.clone();
        handle.spawn(async move {
            for (i, toast) in toasts.iter().enumerate() {
                if i > 0 {
                    inner.clock.sleep(inner.settings.flush_stagger).await;
                }
                inner.sink.show(toast);
            }
        });
    }

    /// Default on-screen duration for a toast kind
    pub fn default_duration(&self, kind: ToastKind) -> ToastDuration {
        match kind {
            ToastKind::Critical => ToastDuration::Persistent,
            _ => ToastDuration::AutoDismiss(self.inner.toast_duration),
        }
    }

    /// Show, queue or drop an already built toast
    pub fn submit(&self, toast: Toast, queueable: bool) -> ToastOutcome {
        let mut state = self.inner.state.lock();

        if toast.kind.is_error() || state.phase.allows(toast.kind) {
            drop(state);
            let id = toast.id;
            self.inner.sink.show(&toast);
            return ToastOutcome::Shown(id);
        }

        if !queueable {
            debug!(
                "Suppressed {} toast during {}: {}",
                toast.kind, state.phase, toast.message
            );
            return ToastOutcome::Suppressed;
        }

        if state.queue.len() >= self.inner.settings.max_queued {
            if let Some(dropped) = state.queue.pop_front() {
                debug!("Startup queue full, dropping oldest toast: {}", dropped.message);
            }
        }
        let id = toast.id;
        debug!("Queued {} toast during {}", toast.kind, state.phase);
        state.queue.push_back(toast);
        ToastOutcome::Queued(id)
    }

    pub fn toast(
        &self,
        kind: ToastKind,
        message: impl Into<String>,
        options: ToastOptions,
    ) -> ToastOutcome {
        let duration = options.duration.unwrap_or_else(|| self.default_duration(kind));
        let mut toast = Toast::new(kind, message, duration);
        toast.title = options.title;
        toast.action = options.action;
        self.submit(toast, options.queueable)
    }

    pub fn success(&self, message: impl Into<String>, options: ToastOptions) -> ToastOutcome {
        self.toast(ToastKind::Success, message, options)
    }

    pub fn info(&self, message: impl Into<String>, options: ToastOptions) -> ToastOutcome {
        self.toast(ToastKind::Info, message, options)
    }

    pub fn warning(&self, message: impl Into<String>, options: ToastOptions) -> ToastOutcome {
        self.toast(ToastKind::Warning, message, options)
    }

    pub fn error(&self, message: impl Into<String>, options: ToastOptions) -> ToastOutcome {
        self.toast(ToastKind::Error, message, options)
    }

    pub fn critical(&self, message: impl Into<String>, options: ToastOptions) -> ToastOutcome {
        self.toast(ToastKind::Critical, message, options)
    }
}
