//! Core error types for Lifeline
//!
//! This module contains the `AppError` value every failure is normalized
//! into, the `ErrorKind` taxonomy it is classified by, and the associated
//! `Result` aliases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Failure categories recognised by the resilience core
///
/// Each kind fixes a default machine code, a default `recoverable` flag and a
/// user-facing message template. All three can be overridden per error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Generic network failure (DNS, reset, unreachable)
    Network,
    /// The local service refused the connection or is not running
    ServiceUnavailable,
    /// An operation exceeded its deadline
    Timeout,
    /// Caller supplied invalid input
    Validation,
    /// The application or service is misconfigured
    Configuration,
    /// Local filesystem failure
    FileSystem,
    /// Persistent storage failure
    Storage,
    /// A bootstrap or host command failed to run
    Invoke,
    /// Every retry attempt failed
    RetryExhausted,
    /// A circuit breaker rejected the call without running it
    CircuitOpen,
    /// Nothing more specific could be inferred
    Unknown,
}

impl ErrorKind {
    /// Stable machine identifier used when no explicit code is supplied
    pub fn default_code(self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::ServiceUnavailable => "SERVICE_CONNECTION_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::FileSystem => "FILESYSTEM_ERROR",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Invoke => "INVOKE_ERROR",
            ErrorKind::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Whether failures of this kind can heal without user intervention
    pub fn default_recoverable(self) -> bool {
        !matches!(self, ErrorKind::Configuration)
    }

    /// Message shown to the user when the caller does not provide one
    pub fn default_user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => "Network connection problem. Retrying automatically.",
            ErrorKind::ServiceUnavailable => {
                "The sync service is not responding. Attempting to reconnect."
            }
            ErrorKind::Timeout => "The operation took too long. Please try again.",
            ErrorKind::Validation => "Some of the provided values are invalid.",
            ErrorKind::Configuration => {
                "The application is misconfigured. Check your settings."
            }
            ErrorKind::FileSystem => "A file operation failed.",
            ErrorKind::Storage => "Saving data failed.",
            ErrorKind::Invoke => "A background command failed.",
            ErrorKind::RetryExhausted => "The operation kept failing after several attempts.",
            ErrorKind::CircuitOpen => {
                "The service is temporarily unavailable. Please wait a moment."
            }
            ErrorKind::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::ServiceUnavailable => "service-unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::FileSystem => "filesystem",
            ErrorKind::Storage => "storage",
            ErrorKind::Invoke => "invoke",
            ErrorKind::RetryExhausted => "retry-exhausted",
            ErrorKind::CircuitOpen => "circuit-open",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Normalized failure flowing through retry, circuit breaker and notifications
///
/// An `AppError` is immutable once built: the builder methods in
/// [`constructors`](super::constructors) consume and return the value.
/// Wrapping kinds (`RetryExhausted`, `Invoke`) keep the underlying failure
/// as `cause`, which is exposed through [`std::error::Error::source`].
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct AppError {
    pub(crate) kind: ErrorKind,
    pub(crate) code: String,
    pub(crate) message: String,
    pub(crate) user_message: String,
    pub(crate) status_code: Option<u16>,
    pub(crate) context: Option<BTreeMap<String, serde_json::Value>>,
    pub(crate) recoverable: bool,
    pub(crate) timestamp: DateTime<Utc>,
    #[source]
    pub(crate) cause: Option<Box<AppError>>,
}

impl AppError {
    /// Create an error of the given kind with the kind's defaults
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            user_message: kind.default_user_message().to_string(),
            status_code: None,
            context: None,
            recoverable: kind.default_recoverable(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn context(&self) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.context.as_ref()
    }

    /// Look up a single context value
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.as_ref().and_then(|ctx| ctx.get(key))
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The wrapped failure, for `RetryExhausted` and `Invoke` errors
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Innermost error of the cause chain (the error itself when unwrapped)
    pub fn root_cause(&self) -> &AppError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
pub type LifelineResult<T> = std::result::Result<T, AppError>;
