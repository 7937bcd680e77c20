//! Self-healing: named recovery strategies and the scheduler that runs them

pub mod registry;
pub mod strategy;

pub use registry::{AutoRecovery, RecoveryState, DEFAULT_MONITOR_INTERVAL};
pub use strategy::{FnStrategy, RecoveryStrategy};
