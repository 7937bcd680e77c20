//! Error conversion implementations for AppError
//!
//! This module provides From trait implementations for converting external
//! error types into AppError, and [`normalize`], the single boundary every
//! raw failure crosses before the rest of the crate sees it.

use super::classify::normalize_message;
use super::types::{AppError, ErrorKind};
use std::io;

/// Normalize any error value into exactly one `AppError`
///
/// Already-normalized errors are returned unchanged; known library errors are
/// mapped structurally; anything else is classified from its message.
pub fn normalize(error: &(dyn std::error::Error + 'static)) -> AppError {
    if let Some(app) = error.downcast_ref::<AppError>() {
        return app.clone();
    }
    if let Some(io_err) = error.downcast_ref::<io::Error>() {
        return from_io_error(io_err);
    }
    if let Some(http_err) = error.downcast_ref::<reqwest::Error>() {
        return from_reqwest_error(http_err);
    }
    if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return AppError::new(ErrorKind::Timeout, error.to_string());
    }
    normalize_message(error.to_string())
}

fn from_io_error(err: &io::Error) -> AppError {
    let message = err.to_string();
    match err.kind() {
        io::ErrorKind::ConnectionRefused => AppError::service_unavailable(message),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            AppError::new(ErrorKind::Timeout, message)
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe => AppError::network(message),
        io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::AlreadyExists => AppError::filesystem(message),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            AppError::new(ErrorKind::Validation, message)
        }
        _ => normalize_message(message),
    }
}

fn from_reqwest_error(err: &reqwest::Error) -> AppError {
    let message = err.to_string();
    let mut app = if err.is_timeout() {
        AppError::new(ErrorKind::Timeout, message)
    } else if err.is_connect() {
        AppError::service_unavailable(message)
    } else if err.is_decode() {
        AppError::new(ErrorKind::Validation, message)
    } else if err.is_builder() {
        AppError::configuration("http_client", message)
    } else if let Some(status) = err.status() {
        match status.as_u16() {
            401 | 403 => AppError::configuration("api_key", message),
            400..=499 => AppError::new(ErrorKind::Validation, message),
            _ => AppError::network(message),
        }
    } else {
        AppError::network(message)
    };

    if let Some(status) = err.status() {
        app = app.with_status(status.as_u16());
    }
    if let Some(url) = err.url() {
        app = app.with_context("url", url.as_str());
    }
    app
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        from_io_error(&err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        from_reqwest_error(&err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::new(ErrorKind::Validation, format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::configuration("toml", err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::configuration("toml", err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::new(ErrorKind::Timeout, "Operation timed out: async_operation")
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            AppError::unknown(format!("Task panicked: {}", err)).with_recoverable(false)
        } else {
            AppError::unknown(format!("Task cancelled: {}", err))
        }
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        normalize_message(message)
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        normalize_message(message)
    }
}
