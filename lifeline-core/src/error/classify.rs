//! Message-based classification for failures that carry no type information
//!
//! Typed sources (io errors, HTTP client errors) are mapped structurally in
//! [`conversions`](super::conversions). Everything else falls back to the
//! ordered table below: the first row with a matching needle wins.

use super::types::{AppError, ErrorKind};

struct Classifier {
    needles: &'static [&'static str],
    kind: ErrorKind,
}

/// Ordered heuristics; more specific categories come first
const CLASSIFIERS: &[Classifier] = &[
    Classifier {
        needles: &[
            "connection refused",
            "econnrefused",
            "not running",
            "failed to connect",
            "service unavailable",
        ],
        kind: ErrorKind::ServiceUnavailable,
    },
    Classifier {
        needles: &["timed out", "timeout", "deadline exceeded"],
        kind: ErrorKind::Timeout,
    },
    Classifier {
        needles: &[
            "network",
            "fetch failed",
            "dns",
            "socket",
            "unreachable",
            "connection reset",
            "econnreset",
            "broken pipe",
        ],
        kind: ErrorKind::Network,
    },
    Classifier {
        needles: &["config", "api key", "apikey", "unauthorized", "forbidden"],
        kind: ErrorKind::Configuration,
    },
    Classifier {
        needles: &["invalid", "validation", "required", "must be", "malformed"],
        kind: ErrorKind::Validation,
    },
    Classifier {
        needles: &[
            "enoent",
            "no such file",
            "permission denied",
            "eacces",
            "directory",
            "file",
        ],
        kind: ErrorKind::FileSystem,
    },
    Classifier {
        needles: &["storage", "quota", "disk full", "no space", "database"],
        kind: ErrorKind::Storage,
    },
    Classifier {
        needles: &["invoke", "command", "sidecar", "spawn"],
        kind: ErrorKind::Invoke,
    },
];

/// Substrings that mark an untyped failure as transient
const TRANSIENT_NEEDLES: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "econnrefused",
    "econnreset",
    "unavailable",
    "temporarily",
    "try again",
    "502",
    "503",
    "504",
];

/// Infer the closest category for a bare message
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    CLASSIFIERS
        .iter()
        .find(|row| row.needles.iter().any(|needle| lowered.contains(needle)))
        .map(|row| row.kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Build an `AppError` from a bare message using the heuristic table
pub fn normalize_message(message: impl Into<String>) -> AppError {
    let message = message.into();
    let kind = classify_message(&message);
    AppError::new(kind, message)
}

/// Heuristic transient check for untyped failures
pub fn message_looks_transient(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_NEEDLES.iter().any(|needle| lowered.contains(needle))
}

/// Whether an error may heal on its own
///
/// Typed errors answer with their `recoverable` flag; errors that could not
/// be classified fall back to the transient-substring heuristic.
pub fn is_retryable(error: &AppError) -> bool {
    match error.kind() {
        ErrorKind::Unknown => message_looks_transient(error.message()),
        _ => error.is_recoverable(),
    }
}

/// Default retry predicate: transient network-level failures only
///
/// A circuit-open rejection is never transient: retrying it would defeat
/// the breaker's load shedding.
pub fn is_transient(error: &AppError) -> bool {
    if let Some(status) = error.status_code() {
        if status == 408 || status == 429 || (500..600).contains(&status) {
            return true;
        }
    }

    match error.kind() {
        ErrorKind::Network | ErrorKind::ServiceUnavailable | ErrorKind::Timeout => true,
        ErrorKind::RetryExhausted | ErrorKind::Invoke => {
            error.cause().map(is_transient).unwrap_or(false)
        }
        ErrorKind::Unknown => message_looks_transient(error.message()),
        _ => false,
    }
}
