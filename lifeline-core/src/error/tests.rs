//! Tests for error normalization and conversions
//!
//! These check that raw failures of every supported shape land in exactly one
//! category and that the `?` operator converts them transparently.

use super::*;
use std::io;
use std::time::Duration;

#[test]
fn test_io_connection_refused_is_service_unavailable() {
    let raw = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
    let err = normalize(&raw);
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(err.code(), "SERVICE_CONNECTION_ERROR");
    assert!(err.is_recoverable());
}

#[test]
fn test_io_not_found_is_filesystem() {
    fn read_missing() -> LifelineResult<String> {
        let contents = std::fs::read_to_string("/definitely/not/here/lifeline.toml")?;
        Ok(contents)
    }

    let err = read_missing().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileSystem);
}

#[test]
fn test_normalize_is_identity_for_app_errors() {
    let original = AppError::validation("device_id", "must not be empty").with_code("BAD_DEVICE");
    let normalized = normalize(&original);
    assert_eq!(normalized.code(), "BAD_DEVICE");
    assert_eq!(normalized.kind(), ErrorKind::Validation);
    assert_eq!(normalized.message(), original.message());
}

#[test]
fn test_normalize_falls_back_to_message_heuristics() {
    #[derive(Debug)]
    struct Opaque;
    impl std::fmt::Display for Opaque {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "upstream request timed out")
        }
    }
    impl std::error::Error for Opaque {}

    assert_eq!(normalize(&Opaque).kind(), ErrorKind::Timeout);
}

#[test]
fn test_configuration_is_not_recoverable() {
    let err = AppError::configuration("service.api_key", "missing");
    assert!(!err.is_recoverable());
    assert_eq!(err.context_value("component").and_then(|v| v.as_str()), Some("service.api_key"));
}

#[test]
fn test_retry_exhausted_carries_cause() {
    let cause = AppError::network("connection reset").with_status(502);
    let err = AppError::retry_exhausted(4, cause);

    assert_eq!(err.kind(), ErrorKind::RetryExhausted);
    assert_eq!(err.context_value("attempts").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(err.status_code(), Some(502));
    assert_eq!(err.cause().map(|c| c.kind()), Some(ErrorKind::Network));
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(err.user_message(), ErrorKind::Network.default_user_message());
}

#[test]
fn test_invoke_wraps_cause_and_root_cause() {
    let inner = AppError::filesystem("binary not found");
    let err = AppError::invoke("start_sidecar", AppError::retry_exhausted(2, inner));
    assert_eq!(err.root_cause().kind(), ErrorKind::FileSystem);
    assert!(err.message().contains("start_sidecar"));
}

#[test]
fn test_user_message_override() {
    let err = AppError::timeout("ping", Duration::from_secs(5)).with_user_message("Still waiting");
    assert_eq!(err.user_message(), "Still waiting");
    assert_eq!(err.code(), "TIMEOUT_ERROR");
}

#[tokio::test]
async fn test_timeout_error_conversion() {
    async fn test_function() -> LifelineResult<()> {
        tokio::time::timeout(Duration::from_millis(1), tokio::time::sleep(Duration::from_secs(1)))
            .await?;
        Ok(())
    }

    let err = test_function().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_join_error_conversion() {
    async fn task_that_panics() {
        panic!("test panic");
    }

    async fn test_function() -> LifelineResult<()> {
        tokio::spawn(task_that_panics()).await?;
        Ok(())
    }

    let err = test_function().await.unwrap_err();
    assert!(err.message().contains("Task panicked"));
    assert!(!err.is_recoverable());
}

#[test]
fn test_toml_error_is_configuration() {
    let result: std::result::Result<toml::Value, _> = toml::from_str("not = [valid");
    let err: AppError = result.unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
