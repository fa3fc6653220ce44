//! TaskContext — passed to every `execute`/`compensate` call

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// Cooperative cancel signal. Task code polls [`CancelSignal::is_cancelled`]
/// at reasonable intervals; the engine never hard-kills a task.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Await cancellation, for task code that wants to race its own work
    /// against the signal with `tokio::select!`.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|c| *c).await;
    }
}

/// The paired sender a [`crate::scheduler::Scheduler`] holds to fire a
/// [`CancelSignal`] for pause or timeout. `Clone` so test harnesses and
/// hosts with more than one place that might need to request cancellation
/// (e.g. a timeout watcher alongside an external pause request) can share
/// one underlying signal.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Read access to prior node outputs and the scratch `variables` map, plus
/// write access to `variables`, given to every task attempt.
pub struct TaskContext {
    pub flow_id: String,
    pub execution_id: Uuid,
    pub node_id: String,
    /// 1-based attempt counter for the current node.
    pub attempt: u32,
    outputs: Arc<HashMap<String, Value>>,
    variables: Arc<RwLock<HashMap<String, Value>>>,
    cancel: CancelSignal,
}

impl TaskContext {
    pub fn new(
        flow_id: impl Into<String>,
        execution_id: Uuid,
        node_id: impl Into<String>,
        attempt: u32,
        outputs: Arc<HashMap<String, Value>>,
        variables: Arc<RwLock<HashMap<String, Value>>>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            execution_id,
            node_id: node_id.into(),
            attempt,
            outputs,
            variables,
            cancel,
        }
    }

    pub fn output(&self, node_id: &str) -> Option<Value> {
        self.outputs.get(node_id).cloned()
    }

    pub fn variable(&self, key: &str) -> Option<Value> {
        self.variables.read().expect("variables lock poisoned").get(key).cloned()
    }

    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        self.variables
            .write()
            .expect("variables lock poisoned")
            .insert(key.into(), value);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}
