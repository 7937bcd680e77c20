pub mod abstractions;
pub mod config;
pub mod context;
pub mod error;
pub mod notification;
pub mod observability;
pub mod patterns;
pub mod recovery;
pub mod service;
pub mod startup;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::LifelineConfig;
pub use context::AppContext;
pub use error::{AppError, ErrorKind, LifelineResult};
