//! Error taxonomy and normalization for Lifeline
//!
//! Every failure that enters the resilience core is normalized into exactly
//! one [`AppError`] before anything classifies it. Retry, the circuit breaker
//! and the notification service only ever see normalized errors.
//!
//! ## Error Categories
//!
//! ```text
//! ┌──────────────────────┬─────────────┬──────────────────────────────┐
//! │ Kind                 │ Recoverable │ Typical recovery             │
//! ├──────────────────────┼─────────────┼──────────────────────────────┤
//! │ Network              │ yes         │ wait and retry               │
//! │ ServiceUnavailable   │ yes         │ bootstrap + probe            │
//! │ Timeout              │ yes         │ retry                        │
//! │ Validation           │ yes         │ none registered (user fixes) │
//! │ Configuration        │ no          │ surfaced as critical         │
//! │ FileSystem / Storage │ yes         │ generic retry                │
//! │ Invoke               │ from cause  │ wraps the underlying failure │
//! │ RetryExhausted       │ from cause  │ manual retry                 │
//! │ CircuitOpen          │ yes         │ wait for breaker reset       │
//! └──────────────────────┴─────────────┴──────────────────────────────┘
//! ```

pub mod classify;
pub mod constructors;
pub mod conversions;
pub mod types;

#[cfg(test)]
mod tests;

pub use classify::{classify_message, is_retryable, is_transient, normalize_message};
pub use conversions::normalize;
pub use types::{AppError, ErrorKind, LifelineResult, Result};
