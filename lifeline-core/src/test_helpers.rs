//! Fakes for tests: a sink that records toasts and scripted service capabilities
//!
//! Available to unit tests and, through the `test-helpers` feature, to
//! integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AppError, LifelineResult};
use crate::notification::toast::{NotificationSink, Toast, ToastKind};
use crate::service::{Bootstrap, BootstrapOutcome, LivenessProbe};

/// Sink that keeps every toast it is shown
#[derive(Debug, Default)]
pub struct RecordingSink {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.toasts.lock().iter().map(|t| t.message.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<ToastKind> {
        self.toasts.lock().iter().map(|t| t.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.toasts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.lock().is_empty()
    }

    pub fn clear(&self) {
        self.toasts.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn show(&self, toast: &Toast) {
        self.toasts.lock().push(toast.clone());
    }
}

/// Probe that answers from a script, then repeats its last answer
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        let script: VecDeque<bool> = script.into_iter().collect();
        let last = script.back().copied().unwrap_or(true);
        Self {
            script: Mutex::new(script),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(up: bool) -> Self {
        Self::new([up])
    }

    /// Change the answer given once the script is used up
    pub fn set_up(&self, up: bool) {
        self.script.lock().clear();
        *self.last.lock() = up;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn probe(&self, timeout: Duration) -> LifelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let up = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.last.lock());
        if up {
            Ok(())
        } else {
            Err(AppError::service_unavailable(format!(
                "connection refused (probe timeout {:?})",
                timeout
            )))
        }
    }
}

/// Bootstrap that counts calls and optionally fails
#[derive(Debug, Default)]
pub struct FakeBootstrap {
    failure: Option<AppError>,
    calls: AtomicU32,
}

impl FakeBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: AppError) -> Self {
        Self {
            failure: Some(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bootstrap for FakeBootstrap {
    async fn bootstrap(&self) -> LifelineResult<BootstrapOutcome> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None if previous == 0 => Ok(BootstrapOutcome::Started),
            None => Ok(BootstrapOutcome::AlreadyRunning),
        }
    }
}
