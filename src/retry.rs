//! Retry/backoff engine with delay schedules chosen per [`ErrorKind`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClassifiedError, ErrorKind};

/// Backoff parameters for one error kind.
///
/// `multiplier == 1.0` grows the delay linearly (`min_delay * attempt`); anything
/// larger grows it exponentially (`min_delay * multiplier^(attempt - 1)`). The result
/// is always clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    pub multiplier: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl RetryStrategy {
    /// Builds a strategy; `multiplier` below 1.0 is raised to 1.0 and `max_delay`
    /// below `min_delay` is raised to `min_delay`.
    pub fn new(multiplier: f64, min_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            multiplier,
            min_delay,
            max_delay: max_delay.max(min_delay),
            max_retries,
        }
    }

    /// Shorthand taking delays in seconds.
    pub fn from_secs(multiplier: f64, min_secs: f64, max_secs: f64, max_retries: u32) -> Self {
        Self::new(
            multiplier,
            Duration::from_secs_f64(min_secs.max(0.0)),
            Duration::from_secs_f64(max_secs.max(0.0)),
            max_retries,
        )
    }

    /// Aggressive exponential backoff for rate limits.
    pub fn rate_limit() -> Self {
        Self::from_secs(2.0, 1.0, 120.0, 3)
    }

    /// Linear, short backoff for validation failures.
    pub fn validation() -> Self {
        Self::from_secs(1.0, 1.0, 10.0, 3)
    }

    /// Moderate backoff for timeouts and connection failures.
    pub fn network() -> Self {
        Self::from_secs(1.5, 2.0, 30.0, 3)
    }

    /// Fallback for retryable kinds without a dedicated entry.
    pub fn fallback() -> Self {
        Self::from_secs(1.5, 1.0, 30.0, 3)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn is_linear(&self) -> bool {
        (self.multiplier - 1.0).abs() < f64::EPSILON
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use llm_connectivity::RetryStrategy;
    ///
    /// let strategy = RetryStrategy::rate_limit();
    /// assert_eq!(strategy.compute_delay(1), Duration::from_secs(1));
    /// assert_eq!(strategy.compute_delay(3), Duration::from_secs(4));
    /// assert_eq!(strategy.compute_delay(30), Duration::from_secs(120));
    /// ```
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let min = self.min_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(min);
        let growth = if self.is_linear() {
            f64::from(attempt)
        } else {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            self.multiplier.powi(exponent)
        };
        let raw = min * growth;
        let clamped = if raw.is_nan() { max } else { raw.clamp(min, max) };
        Duration::from_secs_f64(clamped)
    }
}

/// Maps error kinds to strategies, with a disjoint set of kinds that are never retried.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: HashMap<ErrorKind, RetryStrategy>,
    non_retryable: HashSet<ErrorKind>,
    fallback: RetryStrategy,
}

impl Default for StrategyTable {
    /// RateLimit, Validation and Network get dedicated schedules; Authentication,
    /// ContextWindowExceeded, ModelNotFound and InsufficientCredits are never retried;
    /// everything else uses [`RetryStrategy::fallback`].
    fn default() -> Self {
        Self::new(RetryStrategy::fallback())
            .with_strategy(ErrorKind::RateLimit, RetryStrategy::rate_limit())
            .with_strategy(ErrorKind::Validation, RetryStrategy::validation())
            .with_strategy(ErrorKind::Network, RetryStrategy::network())
            .with_non_retryable(ErrorKind::Authentication)
            .with_non_retryable(ErrorKind::ContextWindowExceeded)
            .with_non_retryable(ErrorKind::ModelNotFound)
            .with_non_retryable(ErrorKind::InsufficientCredits)
    }
}

impl StrategyTable {
    /// Empty table where every kind uses `fallback`.
    pub fn new(fallback: RetryStrategy) -> Self {
        Self {
            strategies: HashMap::new(),
            non_retryable: HashSet::new(),
            fallback,
        }
    }

    /// Assigns a strategy, making `kind` retryable if it was not.
    pub fn with_strategy(mut self, kind: ErrorKind, strategy: RetryStrategy) -> Self {
        self.non_retryable.remove(&kind);
        self.strategies.insert(kind, strategy);
        self
    }

    /// Marks `kind` as never retried, dropping any strategy assigned to it.
    pub fn with_non_retryable(mut self, kind: ErrorKind) -> Self {
        self.strategies.remove(&kind);
        self.non_retryable.insert(kind);
        self
    }

    /// Overrides `max_retries` on every strategy, the fallback included.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        for strategy in self.strategies.values_mut() {
            strategy.max_retries = max_retries;
        }
        self.fallback.max_retries = max_retries;
        self
    }

    /// Strategy for `kind`; `None` when the kind is non-retryable.
    pub fn strategy_for(&self, kind: ErrorKind) -> Option<&RetryStrategy> {
        if self.non_retryable.contains(&kind) {
            return None;
        }
        Some(self.strategies.get(&kind).unwrap_or(&self.fallback))
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !self.non_retryable.contains(&kind)
    }

    pub fn fallback(&self) -> &RetryStrategy {
        &self.fallback
    }
}

/// Suspension seam for backoff waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer; only the calling task is suspended.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Thread-safe sleeper handle.
pub type DynSleeper = Arc<dyn Sleeper>;

/// What the engine does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Transition {
    Backoff(Duration),
    NonRetryable,
    Exhausted,
}

/// Per-call state; lives on the stack of one [`RetryEngine::run`] invocation.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    active_kind: Option<ErrorKind>,
}

impl RetryState {
    fn on_failure(&mut self, table: &StrategyTable, kind: ErrorKind) -> Transition {
        let Some(strategy) = table.strategy_for(kind) else {
            return Transition::NonRetryable;
        };
        if let Some(previous) = self.active_kind.filter(|previous| *previous != kind) {
            debug!(from = %previous, to = %kind, attempt = self.attempt, "switching retry strategy");
        }
        self.active_kind = Some(kind);
        if self.attempt >= strategy.max_retries {
            return Transition::Exhausted;
        }
        self.attempt += 1;
        Transition::Backoff(strategy.compute_delay(self.attempt))
    }
}

/// Wraps a fallible operation and retries it according to a [`StrategyTable`].
///
/// One initial attempt plus at most `max_retries` more. The attempt counter carries
/// over when the error kind changes; the new kind's strategy governs later waits.
/// On exhaustion the *last* error is returned.
#[derive(Clone)]
pub struct RetryEngine {
    table: Arc<StrategyTable>,
    sleeper: DynSleeper,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(StrategyTable::default())
    }
}

impl RetryEngine {
    pub fn new(table: StrategyTable) -> Self {
        Self {
            table: Arc::new(table),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper, e.g. with a recording one in tests.
    pub fn with_sleeper(mut self, sleeper: DynSleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    /// Runs `operation` until it succeeds, hits a non-retryable kind, or exhausts
    /// the active strategy.
    ///
    /// # Errors
    ///
    /// Returns the last [`ClassifiedError`] observed.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut state = RetryState::default();
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if state.attempt > 0 {
                        debug!(retries = state.attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match state.on_failure(&self.table, error.kind()) {
                Transition::Backoff(delay) => {
                    debug!(
                        kind = %error.kind(),
                        provider = error.provider(),
                        attempt = state.attempt,
                        delay_secs = delay.as_secs_f64(),
                        "retrying after backoff"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Transition::NonRetryable => {
                    debug!(kind = %error.kind(), provider = error.provider(), "error is not retryable");
                    return Err(error);
                }
                Transition::Exhausted => {
                    warn!(
                        kind = %error.kind(),
                        provider = error.provider(),
                        retries = state.attempt,
                        "retries exhausted"
                    );
                    return Err(error);
                }
            }
        }
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
