//! Toast values and the sink they are delivered to

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Severity of a toast, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
    Critical,
}

impl ToastKind {
    /// Error and critical toasts bypass startup suppression
    pub fn is_error(self) -> bool {
        matches!(self, ToastKind::Error | ToastKind::Critical)
    }
}

impl fmt::Display for ToastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToastKind::Success => "success",
            ToastKind::Info => "info",
            ToastKind::Warning => "warning",
            ToastKind::Error => "error",
            ToastKind::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// How long a toast stays on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastDuration {
    AutoDismiss(Duration),
    /// Stays until the user dismisses it
    Persistent,
}

/// Manual retry affordance attached to a toast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToastAction {
    pub label: String,
    /// Notification id to pass to `NotificationService::invoke_retry`
    pub notification_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub id: Uuid,
    pub kind: ToastKind,
    pub title: Option<String>,
    pub message: String,
    pub duration: ToastDuration,
    pub action: Option<ToastAction>,
}

impl Toast {
    pub fn new(kind: ToastKind, message: impl Into<String>, duration: ToastDuration) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: None,
            message: message.into(),
            duration,
            action: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_action(mut self, action: ToastAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Per-toast options accepted by the startup gate
#[derive(Debug, Clone, Default)]
pub struct ToastOptions {
    pub title: Option<String>,
    /// Overrides the default duration for the toast kind
    pub duration: Option<ToastDuration>,
    pub action: Option<ToastAction>,
    /// Queue instead of dropping when suppressed during startup
    pub queueable: bool,
}

impl ToastOptions {
    pub fn queueable() -> Self {
        Self {
            queueable: true,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_duration(mut self, duration: ToastDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_action(mut self, action: ToastAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Where toasts end up (a UI, a log, a test recorder)
pub trait NotificationSink: Send + Sync {
    fn show(&self, toast: &Toast);
}

/// Sink that writes toasts to the log, used by the CLI
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn show(&self, toast: &Toast) {
        let title = toast.title.as_deref().unwrap_or("");
        match toast.kind {
            ToastKind::Success | ToastKind::Info => {
                info!(kind = %toast.kind, title, "{}", toast.message)
            }
            ToastKind::Warning => warn!(kind = %toast.kind, title, "{}", toast.message),
            ToastKind::Error | ToastKind::Critical => {
                error!(kind = %toast.kind, title, "{}", toast.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ordering() {
        assert!(ToastKind::Success < ToastKind::Info);
        assert!(ToastKind::Warning < ToastKind::Error);
        assert!(ToastKind::Critical.is_error());
        assert!(!ToastKind::Warning.is_error());
    }

    #[test]
    fn test_toast_ids_are_unique() {
        let a = Toast::new(ToastKind::Info, "a", ToastDuration::Persistent);
        let b = Toast::new(ToastKind::Info, "a", ToastDuration::Persistent);
        assert_ne!(a.id, b.id);
    }
}
