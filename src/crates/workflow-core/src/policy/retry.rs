//! Retry policy (C5) — per-task or flow-default backoff configuration
//!
//! Backoff-strategy shape reworked around the engine's closed error-kind
//! set instead of raw strings, and extended with `fixed`/`linear`
//! strategies and a `retry_on` predicate.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay every attempt.
    Fixed { delay_ms: u64 },
    /// `base + step * attempt`.
    Linear { base_ms: u64, step_ms: u64 },
    /// `base * factor ^ attempt`, capped.
    Exponential {
        base_ms: u64,
        factor: f64,
        cap_ms: u64,
    },
}

impl BackoffStrategy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self {
            BackoffStrategy::Fixed { delay_ms } => *delay_ms,
            BackoffStrategy::Linear { base_ms, step_ms } => {
                base_ms.saturating_add(step_ms.saturating_mul(attempt as u64))
            }
            BackoffStrategy::Exponential {
                base_ms,
                factor,
                cap_ms,
            } => {
                let raw = (*base_ms as f64) * factor.powi(attempt as i32);
                (raw.min(*cap_ms as f64)) as u64
            }
        };
        Duration::from_millis(ms)
    }
}

/// Whether (and how) the computed delay is randomized before sleeping:
/// none, or full jitter (uniform in `[0, computed_delay]`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    #[default]
    None,
    Full,
}

/// A predicate deciding whether a given error kind is retryable. Not
/// serialized; the default allows every kind except `Cancelled` and
/// `ValidationError`.
#[derive(Clone)]
pub struct RetryOn(Arc<dyn Fn(&EngineError) -> bool + Send + Sync>);

impl RetryOn {
    pub fn new(f: impl Fn(&EngineError) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn allows(&self, error: &EngineError) -> bool {
        (self.0)(error)
    }
}

impl Default for RetryOn {
    fn default() -> Self {
        Self::new(EngineError::is_retryable_by_default)
    }
}

impl std::fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RetryOn(..)")
    }
}

/// Configuration attached per task, or inherited from the flow default.
/// `max_attempts` includes the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub jitter: Jitter,
    pub retry_on: RetryOn,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
            jitter: Jitter::None,
            retry_on: RetryOn::default(),
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Whether `attempt` (1-based, the attempt that just failed) has
    /// budget remaining for another try, given `error`.
    pub fn should_retry(&self, attempt: u32, error: &EngineError) -> bool {
        attempt < self.max_attempts && self.retry_on.allows(error)
    }

    /// The delay to wait before `next_attempt` (1-based), applying jitter.
    pub fn delay_for(&self, next_attempt: u32) -> Duration {
        let base = self.strategy.delay_for(next_attempt.saturating_sub(1));
        match self.jitter {
            Jitter::None => base,
            Jitter::Full => {
                let ms = base.as_millis() as u64;
                if ms == 0 {
                    base
                } else {
                    let sampled = rand::thread_rng().gen_range(0..=ms);
                    Duration::from_millis(sampled)
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, exponential backoff starting at 100ms doubling to a
    /// 30s cap, no jitter — a conservative default for flows that don't
    /// configure one explicitly.
    fn default() -> Self {
        Self::new(
            3,
            BackoffStrategy::Exponential {
                base_ms: 100,
                factor: 2.0,
                cap_ms: 30_000,
            },
        )
    }
}
