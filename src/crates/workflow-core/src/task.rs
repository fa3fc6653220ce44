//! Task — the executable unit
//!
//! A `Task` is polymorphic over the capability set
//! `{id, describe, input/output schema, execute, compensate?}`, tagged by
//! `task_id`, rather than over a base class — there is no shared mutable
//! state between tasks. Tasks are value-like (`Arc`-shared) and reusable
//! across flows.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::TaskContext;
use crate::error::EngineError;
use crate::policy::{CircuitConfig, RetryPolicy};
use crate::schema::Schema;

/// A boxed future of a task result: `Box::pin(async move { ... })`.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The capability set every task implements. `compensate` is optional —
/// the default no-ops and [`TaskHandler::has_compensation`] reports
/// `false` so the scheduler knows not to invoke it during compensation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Stable identifier, unique within a flow.
    fn task_id(&self) -> &str;

    /// Human-readable description, surfaced in visualization/inspection.
    fn describe(&self) -> &str {
        self.task_id()
    }

    fn input_schema(&self) -> &Schema;
    fn output_schema(&self) -> &Schema;

    /// `(input, context) -> output`.
    async fn execute(&self, input: Value, ctx: &TaskContext) -> Result<Value, EngineError>;

    /// Whether this task declares a compensation capability at all. A task
    /// with no compensation is simply skipped during the reverse-order
    /// compensation pass.
    fn has_compensation(&self) -> bool {
        false
    }

    /// `(output, context) -> ()`. Only called when `has_compensation` is
    /// `true`. The default is unreachable in practice because the
    /// scheduler never calls it otherwise, but returns `Ok(())` to keep
    /// the trait object total.
    async fn compensate(&self, _output: Value, _ctx: &TaskContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Overrides the flow/scheduler default retry policy for this task.
    /// `None` means "inherit the flow/scheduler default".
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Overrides the scheduler-wide circuit breaker configuration for
    /// this task's `task_id`. `None` means "inherit".
    fn circuit_config(&self) -> Option<CircuitConfig> {
        None
    }

    /// Per-attempt deadline. Exceeding it fires the cancel signal and
    /// counts as a `Timeout` failure. `None` means no deadline.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

pub type TaskRef = Arc<dyn TaskHandler>;

/// Adapter turning a plain async closure into a [`TaskHandler`] with no
/// compensation, for the common case of stateless functional tasks.
pub struct FnTask<F> {
    task_id: String,
    input_schema: Schema,
    output_schema: Schema,
    f: F,
}

impl<F> FnTask<F>
where
    F: Fn(Value, &TaskContext) -> TaskFuture<Result<Value, EngineError>> + Send + Sync,
{
    pub fn new(task_id: impl Into<String>, input_schema: Schema, output_schema: Schema, f: F) -> Self {
        Self {
            task_id: task_id.into(),
            input_schema,
            output_schema,
            f,
        }
    }
}

#[async_trait]
impl<F> TaskHandler for FnTask<F>
where
    F: Fn(Value, &TaskContext) -> TaskFuture<Result<Value, EngineError>> + Send + Sync,
{
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    async fn execute(&self, input: Value, ctx: &TaskContext) -> Result<Value, EngineError> {
        (self.f)(input, ctx).await
    }
}
