//! The append-only event log
//!
//! Events are a denormalized, ordered record of every state transition an
//! execution goes through. They are not required for correctness of resume
//! (the snapshot is) but are required for audit, for replaying a read-only
//! projection, and for the replay-determinism property (Testable Property
//! 1: replaying the log onto an empty `Execution` must reproduce every
//! snapshot byte-for-byte).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of events the engine may append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EventKind {
    ExecutionStarted,
    NodeStarted {
        node_id: String,
        attempt: u32,
    },
    NodeSucceeded {
        node_id: String,
        attempt: u32,
        output_ref: serde_json::Value,
    },
    NodeFailed {
        node_id: String,
        attempt: u32,
        error_kind: String,
        detail: String,
    },
    RetryScheduled {
        node_id: String,
        next_attempt: u32,
        delay_ms: u64,
    },
    Paused {
        reason: String,
    },
    Resumed {
        owner: String,
    },
    CompensationStarted,
    Compensated {
        node_id: String,
    },
    CompensationError {
        node_id: String,
        detail: String,
    },
    ExecutionCompleted {
        final_output_ref: serde_json::Value,
    },
    ExecutionFailed {
        error_kind: String,
    },
}

/// One entry in an execution's event log: `(execution_id, seq, wallclock)`
/// plus the event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub execution_id: Uuid,
    /// Monotonically increasing per execution, assigned by the backend.
    pub seq: u64,
    pub wallclock: DateTime<Utc>,
    pub kind: EventKind,
}
