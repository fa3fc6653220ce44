//! End-to-end scenarios S1-S6.
//!
//! These drive a `Scheduler` directly against an in-memory `StoragePort`,
//! the same way the unit tests in `src/scheduler.rs` do, but each test here
//! corresponds to exactly one named end-to-end scenario rather than one
//! unit of scheduler behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use workflow_core::builder::FlowBuilder;
use workflow_core::config::SchedulerConfig;
use workflow_core::context::{CancelHandle, TaskContext};
use workflow_core::error::{EngineError, Result};
use workflow_core::execution::{Execution, ExecutionStatus};
use workflow_core::policy::{BackoffStrategy, CircuitRegistry, Jitter, RetryPolicy};
use workflow_core::registry::FlowRegistry;
use workflow_core::schema::{PermissiveSchemaPort, Schema};
use workflow_core::scheduler::Scheduler;
use workflow_core::task::{FnTask, TaskHandler, TaskRef};
use workflow_storage::{EventKind, InMemoryStorage, StoragePort};

fn scheduler(storage: Arc<dyn StoragePort>) -> Scheduler {
    Scheduler::new(
        storage,
        Arc::new(PermissiveSchemaPort),
        CircuitRegistry::new(),
        Arc::new(FlowRegistry::new()),
        SchedulerConfig::default(),
    )
}

/// Reads either a `"value"` or a `"result"` field (whichever is present)
/// and emits the doubled amount under `"result"` — lets a two-step
/// `double -> double` chain land on S1's literal output shape.
fn doubling_task(name: &str) -> TaskRef {
    Arc::new(FnTask::new(name, Schema::any(), Schema::any(), |v, _ctx| {
        Box::pin(async move {
            let n = v
                .get("value")
                .or_else(|| v.get("result"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Ok(json!({ "result": n * 2 }))
        })
    }))
}

/// S1 — Sequential doubling: `double -> double` on `{"value": 3}` produces
/// `{"result": 12}`, status `completed`.
#[tokio::test]
async fn s1_sequential_doubling() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
    let plan = FlowBuilder::new(Schema::any())
        .then(doubling_task("double-1"))
        .unwrap()
        .then(doubling_task("double-2"))
        .unwrap()
        .compile()
        .unwrap();
    let exec = Execution::new("s1-double-flow", json!({"value": 3}), Utc::now());
    let (_handle, cancel) = CancelHandle::new();

    let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.completed.last().unwrap().output, json!({"result": 12}));
}

/// S2 — Branch low/high: `double -> branch([result>10 -> tagHigh,
/// result<=10 -> tagLow])` on `{"value": 4}` (intermediate `{"result": 8}`)
/// selects the `tagLow` arm; no events are emitted for the unchosen arm.
#[tokio::test]
async fn s2_branch_selects_low_arm_and_skips_high_arm_events() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
    let tag_high = Arc::new(FnTask::new("tag-high", Schema::any(), Schema::any(), |v, _ctx| {
        Box::pin(async move {
            let result = v.get("result").cloned().unwrap_or(Value::Null);
            Ok(json!({ "result": result, "tag": "high" }))
        })
    })) as TaskRef;
    let tag_low = Arc::new(FnTask::new("tag-low", Schema::any(), Schema::any(), |v, _ctx| {
        Box::pin(async move {
            let result = v.get("result").cloned().unwrap_or(Value::Null);
            Ok(json!({ "result": result, "tag": "low" }))
        })
    })) as TaskRef;

    let plan = FlowBuilder::new(Schema::any())
        .then(doubling_task("double"))
        .unwrap()
        .branch(vec![
            (
                Arc::new(|v: &Value| v.get("result").and_then(Value::as_i64).unwrap_or(0) > 10),
                tag_high.into(),
            ),
            (
                Arc::new(|v: &Value| v.get("result").and_then(Value::as_i64).unwrap_or(0) <= 10),
                tag_low.into(),
            ),
        ])
        .unwrap()
        .compile()
        .unwrap();

    let execution_id;
    {
        let exec = Execution::new("s2-branch-flow", json!({"value": 4}), Utc::now());
        execution_id = exec.execution_id;
        let (_handle, cancel) = CancelHandle::new();
        let storage_for_run = storage.clone();
        let result = scheduler(storage_for_run).run(&plan, exec, cancel).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.completed.last().unwrap().output, json!({"result": 8, "tag": "low"}));
    }

    // No NodeStarted/NodeSucceeded event ever names the tag-high node.
    let events = storage.read_events(execution_id, 0).await.unwrap();
    let touched_high_arm = events.iter().any(|e| match &e.kind {
        EventKind::NodeStarted { node_id, .. } | EventKind::NodeSucceeded { node_id, .. } => {
            node_id.contains("arm.0")
        }
        _ => false,
    });
    assert!(!touched_high_arm, "the unchosen high arm must not appear in the event log");
}

/// S3 — Parallel fan-in: `parallel([addOne, addTwo, addThree])` on
/// `{"value": 10}` emits `[11, 12, 13]` in declared order even though
/// `addThree` (no delay) finishes before `addOne` (longest delay).
#[tokio::test]
async fn s3_parallel_preserves_declared_order_over_completion_order() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());

    fn add_n_task(name: &str, n: i64, delay_ms: u64) -> TaskRef {
        Arc::new(FnTask::new(name, Schema::any(), Schema::any(), move |v, _ctx| {
            Box::pin(async move {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                let value = v.get("value").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!({ "value": value + n }))
            })
        }))
    }

    let plan = FlowBuilder::new(Schema::any())
        .parallel(vec![
            add_n_task("add-one", 1, 30).into(),
            add_n_task("add-two", 2, 15).into(),
            add_n_task("add-three", 3, 0).into(),
        ])
        .unwrap()
        .compile()
        .unwrap();
    let exec = Execution::new("s3-parallel-flow", json!({"value": 10}), Utc::now());
    let (_handle, cancel) = CancelHandle::new();

    let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(
        result.completed.last().unwrap().output,
        json!([{"value": 11}, {"value": 12}, {"value": 13}])
    );
}

/// S4 — Pause/resume in a ForEach: `forEach(square)` on `[1,2,3,4,5]`,
/// paused mid-flight (deterministically, after the 2nd element), resumes
/// and yields `[1,4,9,16,25]`.
///
/// Per the scheduler's resume-granularity doc comment, an interrupted
/// `ForEach` is a top-level node that never reached `completed`, so resume
/// re-executes the whole node fresh rather than fast-forwarding past the
/// elements that already finished — this test exercises exactly that path.
#[tokio::test]
async fn s4_pause_mid_foreach_then_resume_yields_full_result() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
    let invocations = Arc::new(AtomicU32::new(0));
    let (pause_handle, first_cancel) = CancelHandle::new();

    let square = {
        let invocations = invocations.clone();
        let pause_handle = pause_handle.clone();
        Arc::new(FnTask::new("square", Schema::any(), Schema::any(), move |v, _ctx| {
            let invocations = invocations.clone();
            let pause_handle = pause_handle.clone();
            Box::pin(async move {
                let n = v.as_i64().unwrap_or(0);
                let seen = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                if seen == 2 {
                    // Simulate an external pause request landing right after
                    // the 2nd element has committed its result.
                    pause_handle.cancel();
                }
                Ok(json!(n * n))
            })
        }))
    } as TaskRef;

    let plan = FlowBuilder::new(Schema::new(json!({"type": "array"})))
        .for_each(square.into(), 1)
        .unwrap()
        .compile()
        .unwrap();

    let exec = Execution::new("s4-foreach-flow", json!([1, 2, 3, 4, 5]), Utc::now());
    let sched = scheduler(storage.clone());

    let paused = sched.run(&plan, exec, first_cancel).await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert!(paused.completed.is_empty(), "the ForEach node itself never reached completed");

    let (_resume_handle, second_cancel) = CancelHandle::new();
    let resumed = sched.run(&plan, paused, second_cancel).await.unwrap();

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.completed.last().unwrap().output, json!([1, 4, 9, 16, 25]));
}

struct FlakyThenSucceeds {
    failures_remaining: AtomicU32,
}

#[async_trait]
impl TaskHandler for FlakyThenSucceeds {
    fn task_id(&self) -> &str {
        "flaky-s5"
    }
    fn input_schema(&self) -> &Schema {
        static S: std::sync::OnceLock<Schema> = std::sync::OnceLock::new();
        S.get_or_init(Schema::any)
    }
    fn output_schema(&self) -> &Schema {
        self.input_schema()
    }
    async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::TaskError {
                node_id: "0".into(),
                attempt: 1,
                message: "not ready yet".into(),
            });
        }
        Ok(input)
    }
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(
            RetryPolicy::new(
                3,
                BackoffStrategy::Exponential {
                    base_ms: 100,
                    factor: 2.0,
                    cap_ms: 5_000,
                },
            )
            .with_jitter(Jitter::None),
        )
    }
}

/// S5 — Retry then success: a task scripted to fail twice then succeed
/// with `max_attempts=3, exponential(100ms, 2, 5s), jitter=none` produces
/// exactly 3 `NodeStarted` events and one `NodeSucceeded`; `RetryScheduled`
/// delays are 100ms and 200ms.
#[tokio::test]
async fn s5_retry_then_success_matches_exact_attempt_and_delay_sequence() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
    let task: TaskRef = Arc::new(FlakyThenSucceeds {
        failures_remaining: AtomicU32::new(2),
    });
    let plan = FlowBuilder::new(Schema::any()).then(task).unwrap().compile().unwrap();
    let exec = Execution::new("s5-flaky-flow", json!({"value": 1}), Utc::now());
    let execution_id = exec.execution_id;
    let (_handle, cancel) = CancelHandle::new();

    let result = scheduler(storage.clone()).run(&plan, exec, cancel).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);

    let events = storage.read_events(execution_id, 0).await.unwrap();
    let started: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::NodeStarted { .. }))
        .collect();
    let succeeded: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::NodeSucceeded { .. }))
        .collect();
    let retries: Vec<u64> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::RetryScheduled { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();

    assert_eq!(started.len(), 3);
    assert_eq!(succeeded.len(), 1);
    assert_eq!(retries, vec![100, 200]);
}

/// S6 — Compensation on terminal failure: `[chargeCard -> reserveInventory
/// -> ship]` where `ship` fails terminally invokes `reserveInventory`'s
/// compensation then `chargeCard`'s, in that reverse-completion order;
/// final status is `failed`.
struct RecordingTask {
    id: &'static str,
    should_fail: bool,
    compensations: Arc<std::sync::Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl TaskHandler for RecordingTask {
    fn task_id(&self) -> &str {
        self.id
    }
    fn input_schema(&self) -> &Schema {
        static S: std::sync::OnceLock<Schema> = std::sync::OnceLock::new();
        S.get_or_init(Schema::any)
    }
    fn output_schema(&self) -> &Schema {
        self.input_schema()
    }
    async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
        if self.should_fail {
            return Err(EngineError::TaskError {
                node_id: self.id.to_string(),
                attempt: 1,
                message: "cannot ship".into(),
            });
        }
        Ok(input)
    }
    fn has_compensation(&self) -> bool {
        true
    }
    async fn compensate(&self, _output: Value, _ctx: &TaskContext) -> Result<()> {
        self.compensations.lock().unwrap().push(self.id);
        Ok(())
    }
    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::new(1, BackoffStrategy::Fixed { delay_ms: 0 }))
    }
}

#[tokio::test]
async fn s6_terminal_failure_compensates_in_reverse_completion_order() {
    let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
    let compensations = Arc::new(std::sync::Mutex::new(Vec::new()));

    let charge_card: TaskRef = Arc::new(RecordingTask {
        id: "charge-card",
        should_fail: false,
        compensations: compensations.clone(),
    });
    let reserve_inventory: TaskRef = Arc::new(RecordingTask {
        id: "reserve-inventory",
        should_fail: false,
        compensations: compensations.clone(),
    });
    let ship: TaskRef = Arc::new(RecordingTask {
        id: "ship",
        should_fail: true,
        compensations: compensations.clone(),
    });

    let plan = FlowBuilder::new(Schema::any())
        .then(charge_card)
        .unwrap()
        .then(reserve_inventory)
        .unwrap()
        .then(ship)
        .unwrap()
        .compile()
        .unwrap();
    let exec = Execution::new("s6-checkout-flow", json!({"order": "o1"}), Utc::now());
    let (_handle, cancel) = CancelHandle::new();

    let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(
        *compensations.lock().unwrap(),
        vec!["reserve-inventory", "charge-card"]
    );
}
