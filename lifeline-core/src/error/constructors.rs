//! Constructor methods and builder overrides for AppError
//!
//! Every category has a shorthand constructor. Overrides consume the error
//! and return the updated value so call sites read as one expression:
//!
//! ```rust
//! use lifeline_core::error::AppError;
//!
//! let err = AppError::service_unavailable("connection refused on 127.0.0.1:8384")
//!     .with_context("port", 8384)
//!     .with_user_message("Syncthing is not running");
//! assert!(err.is_recoverable());
//! ```

use super::types::{AppError, ErrorKind};
use std::time::Duration;

impl AppError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// The dependency refused the connection or is not running
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    /// Create a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorKind::Timeout,
            format!("Operation timed out: {} after {:?}", operation, duration),
        )
        .with_context("operation", operation)
        .with_context("timeout_ms", duration.as_millis() as u64)
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            ErrorKind::Validation,
            format!("Validation error for {}: {}", field, message.into()),
        )
        .with_context("field", field)
    }

    /// Create a configuration error with component and message
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        let component = component.into();
        Self::new(
            ErrorKind::Configuration,
            format!("Configuration error in {}: {}", component, message.into()),
        )
        .with_context("component", component)
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileSystem, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// A host command failed; the underlying failure is kept as the cause
    pub fn invoke(command: impl Into<String>, cause: AppError) -> Self {
        let command = command.into();
        let recoverable = cause.recoverable;
        let mut err = Self::new(
            ErrorKind::Invoke,
            format!("Command '{}' failed: {}", command, cause.message),
        )
        .with_context("command", command)
        .with_recoverable(recoverable);
        err.status_code = cause.status_code;
        err.cause = Some(Box::new(cause));
        err
    }

    /// Every attempt failed; carries the last failure and the attempt count
    pub fn retry_exhausted(attempts: u32, cause: AppError) -> Self {
        let mut err = Self::new(
            ErrorKind::RetryExhausted,
            format!("Operation failed after {} attempts: {}", attempts, cause.message),
        )
        .with_context("attempts", attempts)
        .with_user_message(cause.user_message.clone())
        .with_recoverable(cause.recoverable);
        err.status_code = cause.status_code;
        err.cause = Some(Box::new(cause));
        err
    }

    /// Rejection issued by an open circuit breaker
    pub fn circuit_open(breaker: impl Into<String>) -> Self {
        let breaker = breaker.into();
        Self::new(
            ErrorKind::CircuitOpen,
            format!("Circuit breaker '{}' is open", breaker),
        )
        .with_context("breaker", breaker)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Override the machine code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Override the display text
    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Attach a structured context entry
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }
}
