//! Recovery strategy trait and a closure-backed implementation

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::RecoverySettings;
use crate::error::LifelineResult;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// A named self-healing routine
///
/// The registry polls `condition` and runs `action` when it holds. An action
/// reports success with `Ok(true)`; `Ok(false)` and errors both count as a
/// failed attempt.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Unique key; strategies keyed by an error code are also run by the
    /// notification service when that error is reported
    fn name(&self) -> &str;

    /// Whether the strategy should run on this tick
    async fn condition(&self) -> bool;

    async fn action(&self) -> LifelineResult<bool>;

    fn max_attempts(&self) -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    /// Minimum time between two attempts
    fn cooldown(&self) -> Duration {
        DEFAULT_COOLDOWN
    }
}

type ConditionFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;
type ActionFn = Arc<dyn Fn() -> BoxFuture<'static, LifelineResult<bool>> + Send + Sync>;

/// Strategy assembled from closures
///
/// Without a condition the strategy never fires on its own and only runs
/// through `AutoRecovery::trigger_recovery`.
#[derive(Clone)]
pub struct FnStrategy {
    name: String,
    condition: Option<ConditionFn>,
    action: ActionFn,
    max_attempts: u32,
    cooldown: Duration,
}

impl FnStrategy {
    pub fn new<A, Fut>(name: impl Into<String>, action: A) -> Self
    where
        A: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifelineResult<bool>> + Send + 'static,
    {
        Self {
            name: name.into(),
            condition: None,
            action: Arc::new(move || action().boxed()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_condition<C, Fut>(mut self, condition: C) -> Self
    where
        C: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.condition = Some(Arc::new(move || condition().boxed()));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Take attempt budget and cooldown from configuration
    pub fn with_settings(self, settings: &RecoverySettings) -> Self {
        self.with_max_attempts(settings.max_attempts)
            .with_cooldown(settings.cooldown)
    }
}

impl fmt::Debug for FnStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStrategy")
            .field("name", &self.name)
            .field("has_condition", &self.condition.is_some())
            .field("max_attempts", &self.max_attempts)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

#[async_trait]
impl RecoveryStrategy for FnStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn condition(&self) -> bool {
        match &self.condition {
            Some(condition) => condition().await,
            None => false,
        }
    }

    async fn action(&self) -> LifelineResult<bool> {
        (self.action)().await
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
