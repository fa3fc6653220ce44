//! The closed error-kind set the engine can produce
//!
//! Every variant of [`EngineError`] maps to exactly one of ten error
//! kinds: `ValidationError`, `TaskError`, `Timeout`, `Cancelled`,
//! `CircuitOpen`, `CompileError`, `CompensationError`, `StorageError`,
//! `LeaseLost`, `ConcurrentVariableConflict`. [`EngineError::kind`] returns
//! the kind tag used verbatim in persisted events (`NodeFailed
//! { error_kind, .. }`, `ExecutionFailed { error_kind }`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures the fluent compiler can raise while turning composition calls
/// into a [`Plan`](crate::graph::Plan). Never surfaces at runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("type mismatch: '{from_node}' produces a value incompatible with '{to_node}'s input")]
    TypeMismatch { from_node: String, to_node: String },

    #[error("branch arms diverge on output type and cannot unify: {detail}")]
    BranchTypeDivergence { detail: String },

    #[error("task_id '{0}' is not unique within this flow")]
    DuplicateTaskId(String),

    #[error("a plan must contain at least one node")]
    EmptyPlan,

    #[error("for_each requires a sequence-typed input, got: {actual_type}")]
    ForEachRequiresSequence { actual_type: String },

    #[error("while_ requires the sub-plan's output type to equal its input type (loop invariant): {detail}")]
    LoopInvariantViolation { detail: String },

    #[error("nested flow reference '{0}' does not resolve to a registered flow")]
    UnknownFlowRef(String),
}

/// All errors the scheduler, policies, or compiler can produce.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A payload failed schema validation (C1). Never retried.
    #[error("validation failed at node '{node_id}': {message}")]
    ValidationError { node_id: String, message: String },

    /// A task's `execute` returned an application-level error.
    #[error("task '{node_id}' failed on attempt {attempt}: {message}")]
    TaskError {
        node_id: String,
        attempt: u32,
        message: String,
    },

    /// A per-attempt deadline was exceeded.
    #[error("node '{node_id}' timed out after {duration_ms}ms on attempt {attempt}")]
    Timeout {
        node_id: String,
        attempt: u32,
        duration_ms: u64,
    },

    /// The attempt observed the cooperative cancel signal before finishing.
    #[error("node '{node_id}' attempt {attempt} was cancelled")]
    Cancelled { node_id: String, attempt: u32 },

    /// The circuit breaker for this task is open; the call short-circuited.
    #[error("circuit open for task '{task_id}'")]
    CircuitOpen { task_id: String },

    /// Graph construction/validation failed (registration time only).
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A task's `compensate` capability itself failed.
    #[error("compensation failed for node '{node_id}': {message}")]
    CompensationError { node_id: String, message: String },

    /// The storage backend reported a failure unrelated to lease loss.
    #[error("storage error: {0}")]
    Storage(String),

    /// The execution's lease expired or was stolen mid-flight.
    #[error("lease lost for execution {execution_id}")]
    LeaseLost { execution_id: String },

    /// Two arms of a `Parallel`/`ForEach` wrote different values to the
    /// same `variables` key.
    #[error("concurrent write to variable '{key}' from arms {arm_a} and {arm_b}")]
    ConcurrentVariableConflict {
        key: String,
        arm_a: usize,
        arm_b: usize,
    },
}

impl EngineError {
    /// The closed-set tag persisted in events and surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ValidationError { .. } => "ValidationError",
            EngineError::TaskError { .. } => "TaskError",
            EngineError::Timeout { .. } => "Timeout",
            EngineError::Cancelled { .. } => "Cancelled",
            EngineError::CircuitOpen { .. } => "CircuitOpen",
            EngineError::Compile(_) => "CompileError",
            EngineError::CompensationError { .. } => "CompensationError",
            EngineError::Storage(_) => "StorageError",
            EngineError::LeaseLost { .. } => "LeaseLost",
            EngineError::ConcurrentVariableConflict { .. } => "ConcurrentVariableConflict",
        }
    }

    /// Whether the default retry policy considers this kind retryable at
    /// all, independent of `max_attempts`: every kind except `Cancelled`
    /// and `ValidationError` is retryable by default; `CircuitOpen` is
    /// excluded too since short-circuiting is never retried at the task
    /// level.
    pub fn is_retryable_by_default(&self) -> bool {
        !matches!(
            self,
            EngineError::Cancelled { .. }
                | EngineError::ValidationError { .. }
                | EngineError::CircuitOpen { .. }
        )
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            EngineError::ValidationError { node_id, .. }
            | EngineError::TaskError { node_id, .. }
            | EngineError::Timeout { node_id, .. }
            | EngineError::Cancelled { node_id, .. }
            | EngineError::CompensationError { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

impl From<workflow_storage::StorageError> for EngineError {
    fn from(err: workflow_storage::StorageError) -> Self {
        match err {
            workflow_storage::StorageError::LeaseLost(execution_id) => {
                EngineError::LeaseLost { execution_id }
            }
            other => EngineError::Storage(other.to_string()),
        }
    }
}
