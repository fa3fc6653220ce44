//! Scheduler configuration
//!
//! A plain, `serde`-deserializable struct with a `Default` impl. The engine
//! never reads it from disk itself — a host loads it from TOML/YAML/env and
//! hands it to [`crate::engine::Engine::new`]. Kept free of closures (the
//! retry/circuit types built from it carry the non-serializable `retry_on`
//! predicate only as a default, never from this struct) so the whole thing
//! round-trips through `serde` cleanly.

use serde::{Deserialize, Serialize};

use crate::policy::{BackoffStrategy, CircuitConfig, Jitter, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bounds how many executions a single `Engine` drives concurrently,
    /// enforced with a `tokio::sync::Semaphore`.
    pub worker_pool_width: usize,

    /// Flow-default retry budget, used when a task declares no
    /// [`crate::task::TaskHandler::retry_policy`] of its own.
    pub default_max_attempts: u32,
    pub default_backoff: BackoffStrategy,
    pub default_jitter: Jitter,

    /// Default `ForEach` concurrency.
    pub default_foreach_concurrency: usize,

    /// Flow-default circuit breaker thresholds, used when a task declares
    /// no [`crate::task::TaskHandler::circuit_config`] of its own.
    pub default_circuit_failure_threshold: u32,
    pub default_circuit_window_ms: u64,
    pub default_circuit_cooldown_ms: u64,

    /// Lease TTL and renew cadence for the exclusive per-execution lease.
    pub lease_ttl_ms: u64,
    pub lease_renew_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.default_max_attempts, self.default_backoff)
            .with_jitter(self.default_jitter)
    }

    pub fn default_circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.default_circuit_failure_threshold,
            window: std::time::Duration::from_millis(self.default_circuit_window_ms),
            cooldown: std::time::Duration::from_millis(self.default_circuit_cooldown_ms),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_width: 16,
            default_max_attempts: 3,
            default_backoff: BackoffStrategy::Exponential {
                base_ms: 100,
                factor: 2.0,
                cap_ms: 30_000,
            },
            default_jitter: Jitter::None,
            default_foreach_concurrency: 1,
            default_circuit_failure_threshold: 5,
            default_circuit_window_ms: 60_000,
            default_circuit_cooldown_ms: 30_000,
            lease_ttl_ms: 30_000,
            lease_renew_interval_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_yaml() {
        let config = SchedulerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: SchedulerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.worker_pool_width, config.worker_pool_width);
        assert_eq!(back.default_max_attempts, config.default_max_attempts);
    }

    #[test]
    fn default_retry_policy_matches_fields() {
        let config = SchedulerConfig::default();
        let policy = config.default_retry_policy();
        assert_eq!(policy.max_attempts, 3);
    }
}
