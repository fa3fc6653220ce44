//! Circuit breaker (C5) — per-task, process-wide failure short-circuiting
//!
//! State/failure-count behind a lock, timeout-driven half-open probe, with
//! this exact transition table: `closed -> open` after `failure_threshold`
//! *consecutive* failures within `window`, `open -> half_open` after
//! `cooldown`, and single-sample half-open transitions (one success
//! closes, one failure reopens).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    config: CircuitConfig,
}

impl Breaker {
    fn new(config: CircuitConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window_start: None,
            opened_at: None,
            config,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.window_start = None;
        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
        }
    }

    fn record_failure(&mut self, now: Instant) {
        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            return;
        }

        let window_expired = self
            .window_start
            .is_some_and(|start| now.duration_since(start) > self.config.window);
        if self.window_start.is_none() || window_expired {
            self.window_start = Some(now);
            self.consecutive_failures = 0;
        }
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.config.failure_threshold {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    /// Checks cooldown expiry and advances `open -> half_open` as a side
    /// effect once `cooldown` has elapsed.
    fn poll_state(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if now.duration_since(opened_at) >= self.config.cooldown {
                    self.state = CircuitState::HalfOpen;
                }
            }
        }
        self.state
    }
}

/// Process-wide registry of per-task circuit breakers, keyed by
/// `task_id`. One `Engine` owns one registry and hands `Arc` clones to
/// every `Scheduler` it creates.
#[derive(Clone, Default)]
pub struct CircuitRegistry {
    breakers: Arc<RwLock<HashMap<String, Breaker>>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Err(CircuitOpen)` without calling the task if the breaker
    /// for `task_id` is open; otherwise permits the call (transitioning
    /// `open -> half_open` first if the cooldown has elapsed).
    pub async fn check(&self, task_id: &str, config: &CircuitConfig) -> Result<(), EngineError> {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(task_id.to_string())
            .or_insert_with(|| Breaker::new(config.clone()));
        match breaker.poll_state(Instant::now()) {
            CircuitState::Open => Err(EngineError::CircuitOpen {
                task_id: task_id.to_string(),
            }),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    pub async fn record_success(&self, task_id: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(task_id) {
            breaker.record_success();
        }
    }

    pub async fn record_failure(&self, task_id: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(task_id) {
            breaker.record_failure(Instant::now());
        }
    }

    pub async fn state_of(&self, task_id: &str) -> Option<CircuitState> {
        self.breakers
            .read()
            .await
            .get(task_id)
            .map(|b| b.state)
    }
}
