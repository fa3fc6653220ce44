//! Per-attempt task outcome records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The outcome of a single attempt at a node, as recorded by
/// `put_task_result`. Kept distinct from the event log so a host can query
/// "what did attempt N of node X return" without scanning the whole event
/// stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub node_id: String,
    pub attempt: u32,
    pub outcome: TaskOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TaskOutcome {
    Success { output: serde_json::Value },
    Failure { error_kind: String, detail: String },
}
