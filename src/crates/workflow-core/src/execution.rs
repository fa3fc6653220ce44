//! Execution — the runtime record a [`crate::scheduler::Scheduler`] drives

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `completed`/`failed`/in-flight partition the nodes reached so far; the
/// invariant is enforced by the scheduler, not this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Compensating,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedNode {
    pub node_id: String,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNode {
    pub node_id: String,
    pub error_kind: String,
    pub error_detail: String,
}

/// A runtime record. Serialized verbatim as the snapshot blob; field
/// order here is for readability only — encoding canonicalizes keys
/// before hashing/comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub flow_id: String,
    pub status: ExecutionStatus,
    /// The node_id currently in progress or next to run. `None` before
    /// the first node has been determined (immediately after creation).
    pub cursor: Option<String>,
    pub completed: Vec<CompletedNode>,
    pub failed: Vec<FailedNode>,
    pub outputs: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The next version number `put_snapshot` should be called with.
    /// Bookkeeping the scheduler threads alongside the execution so every
    /// snapshot it writes advances monotonically — `put_snapshot` fails on
    /// a version that already exists.
    pub snapshot_version: u64,
}

impl Execution {
    pub fn new(flow_id: impl Into<String>, input: Value, now: DateTime<Utc>) -> Self {
        let execution_id = Uuid::new_v4();
        let mut outputs = HashMap::new();
        outputs.insert("__input__".to_string(), input);
        Self {
            execution_id,
            flow_id: flow_id.into(),
            status: ExecutionStatus::Pending,
            cursor: None,
            completed: Vec::new(),
            failed: Vec::new(),
            outputs,
            variables: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            snapshot_version: 0,
        }
    }

    /// Returns the version to snapshot at and advances the counter.
    pub fn take_snapshot_version(&mut self) -> u64 {
        let version = self.snapshot_version;
        self.snapshot_version += 1;
        version
    }

    pub fn input(&self) -> &Value {
        self.outputs
            .get("__input__")
            .expect("Execution::new always seeds __input__")
    }

    pub fn record_success(&mut self, node_id: &str, output: Value, now: DateTime<Utc>) {
        self.outputs.insert(node_id.to_string(), output.clone());
        self.completed.push(CompletedNode {
            node_id: node_id.to_string(),
            output,
        });
        self.updated_at = now;
    }

    pub fn record_failure(
        &mut self,
        node_id: &str,
        error_kind: impl Into<String>,
        error_detail: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.failed.push(FailedNode {
            node_id: node_id.to_string(),
            error_kind: error_kind.into(),
            error_detail: error_detail.into(),
        });
        self.updated_at = now;
    }

    /// The value a newly-ready node at `cursor` should receive as input:
    /// the previous node's output, or the execution input if nothing has
    /// completed yet (the `Step` input binding rule).
    pub fn last_output(&self) -> Value {
        self.completed
            .last()
            .map(|c| c.output.clone())
            .unwrap_or_else(|| self.input().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_seeds_input_and_pending_status() {
        let now = Utc::now();
        let exec = Execution::new("flow-a", serde_json::json!({"x": 1}), now);
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.input(), &serde_json::json!({"x": 1}));
        assert_eq!(exec.last_output(), serde_json::json!({"x": 1}));
    }

    #[test]
    fn record_success_updates_outputs_and_last_output() {
        let now = Utc::now();
        let mut exec = Execution::new("flow-a", serde_json::json!(1), now);
        exec.record_success("0", serde_json::json!(2), now);
        assert_eq!(exec.outputs.get("0"), Some(&serde_json::json!(2)));
        assert_eq!(exec.last_output(), serde_json::json!(2));
        assert_eq!(exec.completed.len(), 1);
    }
}
