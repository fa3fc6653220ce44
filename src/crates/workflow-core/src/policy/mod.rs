//! Policies: Retry, Circuit Breaker, Compensation (C5)
//!
//! Compensation itself has no standalone policy object — it is an
//! unconditional reverse-order walk the scheduler performs on terminal
//! failure (see [`crate::scheduler`]) — so this module only holds the two
//! policies that are genuinely configurable per task.

pub mod circuit;
pub mod retry;

pub use circuit::{CircuitConfig, CircuitRegistry, CircuitState};
pub use retry::{BackoffStrategy, Jitter, RetryOn, RetryPolicy};
