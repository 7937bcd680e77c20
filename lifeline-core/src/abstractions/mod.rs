//! Abstractions over environment services so the resilience core can be
//! exercised deterministically in tests.

pub mod time;

pub use time::{Clock, Instant, MockClock, SystemClock};
