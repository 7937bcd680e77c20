//! Logging setup and span helpers
//!
//! Library code only emits `tracing` events. Binaries call [`init_tracing`]
//! once at startup; `RUST_LOG` overrides the default filter.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Default filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "lifeline_core=info,lifeline=info";

/// Initialize tracing with environment-based configuration
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

/// Initialize tracing with an explicit fallback filter (e.g. from `--verbose`)
pub fn init_tracing_with(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true);

    let _ = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Create a span for one recovery run
#[inline]
pub fn recovery_span(strategy: &str, attempt: u32) -> Span {
    tracing::info_span!(
        "recovery",
        strategy = %strategy,
        attempt = attempt,
        outcome = tracing::field::Empty,
    )
}

/// Create a span for a call guarded by a circuit breaker
#[inline]
pub fn breaker_span(breaker: &str) -> Span {
    tracing::debug_span!(
        "breaker",
        breaker = %breaker,
        state = tracing::field::Empty,
    )
}
