//! Notification service and the toasts it produces
//!
//! Errors are classified into a toast severity, deduplicated inside a short
//! window and handed to the startup gate, which forwards them to a
//! [`NotificationSink`]. Recoverable errors with a matching recovery strategy
//! trigger it automatically.

pub mod service;
pub mod toast;

pub use service::{classify_severity, ErrorEvent, NotificationService, NotifyOptions, RetryAction};
pub use toast::{
    NotificationSink, Toast, ToastAction, ToastDuration, ToastKind, ToastOptions, TracingSink,
};
