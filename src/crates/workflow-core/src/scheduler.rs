//! Scheduler / Executor (C6) — drives a compiled [`Plan`] to a terminal
//! status
//!
//! This is the core of the engine: the node state machine
//! (`READY -> RUNNING -> (SUCCEEDED | FAILED)`, with `FAILED` looping back
//! to `READY` through `RETRY_SCHEDULED` while budget remains), the input
//! binding rules per operator, and the compensation pass on terminal
//! failure.
//!
//! **Resume granularity.** In-flight nodes from a pre-pause snapshot are
//! treated as READY, not partially executed — tasks must be
//! idempotent-across-attempts, and non-idempotent work goes through
//! compensation, not replay. This engine takes that literally at the
//! granularity of a *top-level plan node*: the "already completed, skip on
//! resume" check (matching `node_id` against [`Execution::completed`]) is
//! only ever consulted for nodes directly in the root [`Plan`]'s node list.
//! A `Branch`/`Parallel`/`While`/`ForEach` that was interrupted mid-flight
//! re-runs as a whole from its own start on resume rather than
//! fast-forwarding through the sub-steps it had already finished —
//! simpler to reason about, and well within the "READY, not partial"
//! contract above. See `DESIGN.md` for the ledger entry. This also
//! sidesteps a correctness trap: `While`/`ForEach` bodies reuse the same
//! compiled `node_id` on every iteration/element, so a naive per-node-id
//! completion cache would wrongly skip the second iteration of a loop
//! whose first iteration already ran in the same live execution.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use workflow_storage::{EventKind, EventRecord, StoragePort, TaskOutcome, TaskResult};

use crate::config::SchedulerConfig;
use crate::context::{CancelHandle, CancelSignal, TaskContext};
use crate::error::{EngineError, Result};
use crate::execution::{Execution, ExecutionStatus};
use crate::graph::{BranchArm, Node, Plan, Predicate};
use crate::policy::CircuitRegistry;
use crate::registry::FlowRegistry;
use crate::schema::SchemaPort;
use crate::task::TaskRef;

/// The detail string used when a `Branch` matches no arm: it is a
/// `TaskError` carrying this exact detail, and is never retried regardless
/// of the effective retry policy's `max_attempts`.
pub const NO_MATCHING_BRANCH: &str = "NoMatchingBranch";

type Variables = std::sync::RwLock<HashMap<String, Value>>;

/// Drives one `(Plan, Execution)` pair to a terminal status, applying
/// retry/circuit/compensation policy along the way (C6).
///
/// A `Scheduler` is cheap to construct and holds no execution-specific
/// state itself — everything it needs for one run is threaded through
/// [`Scheduler::run`]'s arguments, so one instance can be reused (or
/// recreated) across many executions. [`crate::engine::Engine`] owns the
/// long-lived pieces (`FlowRegistry`, `CircuitRegistry`) and constructs a
/// `Scheduler` per drive.
pub struct Scheduler {
    storage: Arc<dyn StoragePort>,
    schema_port: Arc<dyn SchemaPort>,
    circuits: CircuitRegistry,
    registry: Arc<FlowRegistry>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn StoragePort>,
        schema_port: Arc<dyn SchemaPort>,
        circuits: CircuitRegistry,
        registry: Arc<FlowRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            schema_port,
            circuits,
            registry,
            config,
        }
    }

    /// Drive `exec` against `plan` until it reaches `completed`, `failed`,
    /// or `paused`. Returns `Err` only for the two kinds that cause the
    /// scheduler to release the execution outright rather than becoming a
    /// terminal execution status: `StorageError` and `LeaseLost`. Every
    /// other failure is caught here, drives compensation if applicable,
    /// and comes back as `Ok(Execution)` with `status == Failed`.
    pub async fn run(&self, plan: &Plan, mut exec: Execution, cancel: CancelSignal) -> Result<Execution> {
        let was_fresh = matches!(exec.status, ExecutionStatus::Pending);
        exec.status = ExecutionStatus::Running;
        let execution_id = exec.execution_id;
        let flow_id = exec.flow_id.clone();

        if was_fresh {
            self.storage
                .append_event(EventRecord {
                    execution_id,
                    seq: 0,
                    wallclock: Utc::now(),
                    kind: EventKind::ExecutionStarted,
                })
                .await?;
        } else {
            self.storage
                .append_event(EventRecord {
                    execution_id,
                    seq: 0,
                    wallclock: Utc::now(),
                    kind: EventKind::Resumed {
                        owner: flow_id.clone(),
                    },
                })
                .await?;
        }

        let root_input = exec.last_output();
        let variables = Arc::new(Variables::new(std::mem::take(&mut exec.variables)));
        let state = Mutex::new(exec);

        info!(%execution_id, %flow_id, resumed = !was_fresh, "scheduler advancing execution");

        let outcome = self
            .execute_toplevel(plan, root_input, &state, &variables, &cancel)
            .await;

        let mut exec = state.into_inner();
        exec.variables = variables.read().expect("variables lock poisoned").clone();

        match outcome {
            Ok(final_value) => {
                exec.status = ExecutionStatus::Completed;
                let version = exec.take_snapshot_version();
                let blob = to_blob(&exec)?;
                self.storage.put_snapshot(execution_id, version, blob).await?;
                self.storage
                    .append_event(EventRecord {
                        execution_id,
                        seq: 0,
                        wallclock: Utc::now(),
                        kind: EventKind::ExecutionCompleted {
                            final_output_ref: final_value,
                        },
                    })
                    .await?;
                info!(%execution_id, "execution completed");
                Ok(exec)
            }
            // The spec requires these two kinds to escape rather than be
            // turned into a terminal execution status — an external
            // supervisor decides whether to hand the execution to a fresh
            // scheduler.
            Err(escaping @ (EngineError::Storage(_) | EngineError::LeaseLost { .. })) => Err(escaping),
            Err(EngineError::Cancelled { .. }) => {
                let paused = cancel.is_cancelled();
                exec.status = if paused {
                    ExecutionStatus::Paused
                } else {
                    ExecutionStatus::Failed
                };
                let version = exec.take_snapshot_version();
                let blob = to_blob(&exec)?;
                self.storage.put_snapshot(execution_id, version, blob).await?;
                let kind = if paused {
                    EventKind::Paused {
                        reason: "cancel signal observed".to_string(),
                    }
                } else {
                    EventKind::ExecutionFailed {
                        error_kind: "Cancelled".to_string(),
                    }
                };
                self.storage
                    .append_event(EventRecord {
                        execution_id,
                        seq: 0,
                        wallclock: Utc::now(),
                        kind,
                    })
                    .await?;
                info!(%execution_id, paused, "execution halted on cancellation");
                Ok(exec)
            }
            Err(err) => {
                warn!(%execution_id, error = %err, "execution terminally failed, compensating");
                exec.status = ExecutionStatus::Compensating;
                let version = exec.take_snapshot_version();
                let blob = to_blob(&exec)?;
                self.storage.put_snapshot(execution_id, version, blob).await?;
                self.storage
                    .append_event(EventRecord {
                        execution_id,
                        seq: 0,
                        wallclock: Utc::now(),
                        kind: EventKind::CompensationStarted,
                    })
                    .await?;

                self.compensate(plan, &mut exec, &flow_id, &err).await?;

                exec.status = ExecutionStatus::Failed;
                let version = exec.take_snapshot_version();
                let blob = to_blob(&exec)?;
                self.storage.put_snapshot(execution_id, version, blob).await?;
                self.storage
                    .append_event(EventRecord {
                        execution_id,
                        seq: 0,
                        wallclock: Utc::now(),
                        kind: EventKind::ExecutionFailed {
                            error_kind: err.kind().to_string(),
                        },
                    })
                    .await?;
                error!(%execution_id, error_kind = err.kind(), "execution failed");
                Ok(exec)
            }
        }
    }

    /// Walk the root plan's top-level node list, skipping any node whose
    /// output is already in `completed` (the resume fast-forward — see the
    /// module doc for why this is root-level only).
    async fn execute_toplevel(
        &self,
        plan: &Plan,
        input: Value,
        state: &Mutex<Execution>,
        variables: &Arc<Variables>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let mut current = input;
        for node in &plan.nodes {
            let cached = {
                let exec = state.lock().await;
                exec.completed
                    .iter()
                    .find(|c| c.node_id == *node.id())
                    .map(|c| c.output.clone())
            };
            current = match cached {
                Some(output) => output,
                None => self.execute_node(node, current, state, variables, cancel).await?,
            };
        }
        Ok(current)
    }

    /// Execute every node of `plan` unconditionally — used for anything
    /// that isn't the root plan (branch arms, parallel/foreach bodies,
    /// while bodies). No resume shortcut here: these run fresh every time
    /// their containing node is entered.
    fn execute_plan_fresh<'a>(
        &'a self,
        plan: &'a Plan,
        input: Value,
        state: &'a Mutex<Execution>,
        variables: &'a Arc<Variables>,
        cancel: &'a CancelSignal,
    ) -> futures::future::BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut current = input;
            for node in &plan.nodes {
                current = self.execute_node(node, current, state, variables, cancel).await?;
            }
            Ok(current)
        })
    }

    fn execute_node<'a>(
        &'a self,
        node: &'a Node,
        input: Value,
        state: &'a Mutex<Execution>,
        variables: &'a Arc<Variables>,
        cancel: &'a CancelSignal,
    ) -> futures::future::BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    node_id: node.id().clone(),
                    attempt: 0,
                });
            }
            match node {
                Node::Step { id, task } => self.execute_step(id, task, input, state, variables, cancel).await,
                Node::Branch { id, arms, .. } => {
                    self.execute_branch(id, arms, input, state, variables, cancel).await
                }
                Node::Parallel { id, arms } => self.execute_parallel(id, arms, input, state, variables, cancel).await,
                Node::While { id, predicate, body } => {
                    self.execute_while(id, predicate, body, input, state, variables, cancel)
                        .await
                }
                Node::ForEach { id, body, concurrency } => {
                    self.execute_foreach(id, body, *concurrency, input, state, variables, cancel)
                        .await
                }
                Node::Nested { id, flow_ref, .. } => {
                    self.execute_nested(id, flow_ref, input, state, cancel).await
                }
            }
        })
    }

    async fn execute_step(
        &self,
        node_id: &str,
        task: &TaskRef,
        input: Value,
        state: &Mutex<Execution>,
        variables: &Arc<Variables>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let retry_policy = task.retry_policy().unwrap_or_else(|| self.config.default_retry_policy());
        let circuit_config = task
            .circuit_config()
            .unwrap_or_else(|| self.config.default_circuit_config());

        let validated_input = task
            .input_schema()
            .validate(&input, self.schema_port.as_ref())
            .map_err(|_| EngineError::ValidationError {
                node_id: node_id.to_string(),
                message: format!("input to '{}' failed schema validation", task.task_id()),
            })?;

        let (flow_id, execution_id) = {
            let exec = state.lock().await;
            (exec.flow_id.clone(), exec.execution_id)
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    node_id: node_id.to_string(),
                    attempt,
                });
            }

            if let Err(circuit_err) = self.circuits.check(task.task_id(), &circuit_config).await {
                self.circuits.record_failure(task.task_id()).await;
                self.commit_failure(state, node_id, attempt, &circuit_err).await?;
                return Err(circuit_err);
            }

            self.record_started(state, node_id, attempt).await?;

            let outputs_snapshot = {
                let exec = state.lock().await;
                Arc::new(exec.outputs.clone())
            };
            let ctx = TaskContext::new(
                flow_id.clone(),
                execution_id,
                node_id,
                attempt,
                outputs_snapshot,
                variables.clone(),
                cancel.clone(),
            );

            let outcome: std::result::Result<Value, EngineError> = match task.timeout() {
                Some(duration) => match tokio::time::timeout(duration, task.execute(validated_input.clone(), &ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout {
                        node_id: node_id.to_string(),
                        attempt,
                        duration_ms: duration.as_millis() as u64,
                    }),
                },
                None => task.execute(validated_input.clone(), &ctx).await,
            };

            match outcome {
                Ok(output) => {
                    let validated_output =
                        task.output_schema()
                            .validate(&output, self.schema_port.as_ref())
                            .map_err(|_| EngineError::ValidationError {
                                node_id: node_id.to_string(),
                                message: format!("output of '{}' failed schema validation", task.task_id()),
                            })?;
                    self.circuits.record_success(task.task_id()).await;
                    self.commit_success(state, node_id, attempt, validated_output.clone()).await?;
                    debug!(node_id, attempt, "step succeeded");
                    return Ok(validated_output);
                }
                Err(err) => {
                    if !matches!(err, EngineError::Cancelled { .. }) {
                        self.circuits.record_failure(task.task_id()).await;
                    }
                    self.record_attempt_failed(state, node_id, attempt, &err).await?;

                    if matches!(err, EngineError::Cancelled { .. }) {
                        return Err(err);
                    }

                    let structural_no_retry =
                        matches!(&err, EngineError::TaskError { message, .. } if message == NO_MATCHING_BRANCH);
                    let should_retry = !structural_no_retry && retry_policy.should_retry(attempt, &err);

                    if should_retry {
                        let delay = retry_policy.delay_for(attempt + 1);
                        self.record_retry_scheduled(state, node_id, attempt + 1, delay.as_millis() as u64)
                            .await?;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.clone().cancelled() => {
                                return Err(EngineError::Cancelled { node_id: node_id.to_string(), attempt });
                            }
                        }
                        continue;
                    }

                    self.commit_failure(state, node_id, attempt, &err).await?;
                    return Err(err);
                }
            }
        }
    }

    async fn execute_branch(
        &self,
        node_id: &str,
        arms: &[BranchArm],
        input: Value,
        state: &Mutex<Execution>,
        variables: &Arc<Variables>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        for arm in arms {
            if (arm.predicate)(&input) {
                let value = self
                    .execute_plan_fresh(&arm.plan, input.clone(), state, variables, cancel)
                    .await?;
                self.commit_success(state, node_id, 1, value.clone()).await?;
                return Ok(value);
            }
        }
        let err = EngineError::TaskError {
            node_id: node_id.to_string(),
            attempt: 1,
            message: NO_MATCHING_BRANCH.to_string(),
        };
        self.commit_failure(state, node_id, 1, &err).await?;
        Err(err)
    }

    async fn execute_parallel(
        &self,
        node_id: &str,
        arms: &[Plan],
        input: Value,
        state: &Mutex<Execution>,
        variables: &Arc<Variables>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let base_vars = variables.read().expect("variables lock poisoned").clone();

        let futs = arms.iter().enumerate().map(|(idx, arm_plan)| {
            let arm_vars = Arc::new(Variables::new(base_vars.clone()));
            let input = input.clone();
            async move {
                let result = self.execute_plan_fresh(arm_plan, input, state, &arm_vars, cancel).await;
                (idx, result, arm_vars)
            }
        });

        // `join_all` preserves input order in its result Vec regardless of
        // completion order, which is exactly Testable Property 4's
        // requirement for `Parallel` output ordering.
        let results = join_all(futs).await;
        let (output, merged_vars) = Self::merge_arm_results(results, arms.len(), &base_vars)?;

        *variables.write().expect("variables lock poisoned") = merged_vars;
        self.commit_success(state, node_id, 1, output.clone()).await?;
        Ok(output)
    }

    async fn execute_foreach(
        &self,
        node_id: &str,
        body: &Plan,
        concurrency: usize,
        input: Value,
        state: &Mutex<Execution>,
        variables: &Arc<Variables>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let items = input.as_array().cloned().ok_or_else(|| EngineError::TaskError {
            node_id: node_id.to_string(),
            attempt: 1,
            message: "for_each requires a sequence-typed input value".to_string(),
        })?;
        let base_vars = variables.read().expect("variables lock poisoned").clone();
        let arm_count = items.len();

        let results = stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| {
                let arm_vars = Arc::new(Variables::new(base_vars.clone()));
                async move {
                    let result = self.execute_plan_fresh(body, item, state, &arm_vars, cancel).await;
                    (idx, result, arm_vars)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let (output, merged_vars) = Self::merge_arm_results(results, arm_count, &base_vars)?;

        *variables.write().expect("variables lock poisoned") = merged_vars;
        self.commit_success(state, node_id, 1, output.clone()).await?;
        Ok(output)
    }

    /// Shared reassembly for `Parallel` and `ForEach`: places each arm's
    /// output at its declared/input index regardless of completion order,
    /// and merges each arm's `variables` writes back with last-writer-wins
    /// semantics keyed by arm index — a same-key write of differing values
    /// across arms is a `ConcurrentVariableConflict`.
    fn merge_arm_results(
        results: Vec<(usize, Result<Value>, Arc<Variables>)>,
        expected_len: usize,
        base_vars: &HashMap<String, Value>,
    ) -> Result<(Value, HashMap<String, Value>)> {
        let mut outputs: Vec<Value> = vec![Value::Null; expected_len];
        let mut pending_writes: HashMap<String, (usize, Value)> = HashMap::new();
        let mut first_err: Option<EngineError> = None;

        for (idx, result, arm_vars) in results {
            match result {
                Ok(value) => {
                    outputs[idx] = value;
                    let final_vars = arm_vars.read().expect("variables lock poisoned").clone();
                    for (key, value) in final_vars.iter() {
                        if base_vars.get(key) == Some(value) {
                            continue; // unchanged by this arm
                        }
                        match pending_writes.get(key) {
                            Some((_, existing)) if existing != value => {
                                return Err(EngineError::ConcurrentVariableConflict {
                                    key: key.clone(),
                                    arm_a: pending_writes[key].0,
                                    arm_b: idx,
                                });
                            }
                            _ => {
                                pending_writes.insert(key.clone(), (idx, value.clone()));
                            }
                        }
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }

        let mut merged = base_vars.clone();
        for (key, (_, value)) in pending_writes {
            merged.insert(key, value);
        }
        Ok((Value::Array(outputs), merged))
    }

    async fn execute_while(
        &self,
        node_id: &str,
        predicate: &Predicate,
        body: &Plan,
        input: Value,
        state: &Mutex<Execution>,
        variables: &Arc<Variables>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let mut current = input;
        while predicate(&current) {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    node_id: node_id.to_string(),
                    attempt: 0,
                });
            }
            current = self
                .execute_plan_fresh(body, current, state, variables, cancel)
                .await?;
        }
        self.commit_success(state, node_id, 1, current.clone()).await?;
        Ok(current)
    }

    async fn execute_nested(
        &self,
        node_id: &str,
        flow_ref: &str,
        input: Value,
        state: &Mutex<Execution>,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let parent_execution_id = state.lock().await.execution_id;

        let child_plan = self.registry.get(flow_ref).ok_or_else(|| EngineError::TaskError {
            node_id: node_id.to_string(),
            attempt: 1,
            message: format!("nested flow '{flow_ref}' is not registered"),
        })?;

        let mut child_exec = Execution::new(flow_ref, input, Utc::now());
        child_exec
            .metadata
            .insert("parent_execution_id".to_string(), Value::String(parent_execution_id.to_string()));
        let child_id = child_exec.execution_id;

        let lease = self
            .storage
            .acquire_lease(child_id, &format!("nested:{parent_execution_id}"), self.config.lease_ttl_ms)
            .await?;

        let child_result = self.run(&child_plan, child_exec, cancel.clone()).await;
        // Best-effort: a lease release failure here shouldn't mask the
        // child's actual outcome.
        let _ = self.storage.release_lease(&lease).await;

        let child_exec = child_result?;
        match child_exec.status {
            ExecutionStatus::Completed => Ok(child_exec
                .completed
                .last()
                .map(|c| c.output.clone())
                .unwrap_or(Value::Null)),
            _ => {
                let err = EngineError::TaskError {
                    node_id: node_id.to_string(),
                    attempt: 1,
                    message: format!("nested flow '{flow_ref}' (execution {child_id}) did not complete"),
                };
                self.commit_failure(state, node_id, 1, &err).await?;
                Err(err)
            }
        }
    }

    /// Reverse-order compensation pass on terminal failure:
    /// every successfully completed node whose task declares a
    /// compensation capability gets it invoked, in the reverse of the
    /// order it completed in. Compensation failures are logged and
    /// recorded but do not themselves trigger further compensation.
    async fn compensate(&self, plan: &Plan, exec: &mut Execution, flow_id: &str, failure: &EngineError) -> Result<()> {
        let execution_id = exec.execution_id;
        let variables = Arc::new(Variables::new(exec.variables.clone()));
        let completed = exec.completed.clone();

        for completed_node in completed.iter().rev() {
            let Some(Node::Step { task, .. }) = plan.node_by_id(&completed_node.node_id) else {
                continue;
            };
            if !task.has_compensation() {
                continue;
            }
            let ctx = TaskContext::new(
                flow_id.to_string(),
                execution_id,
                completed_node.node_id.clone(),
                1,
                Arc::new(exec.outputs.clone()),
                variables.clone(),
                CancelHandle::new().1,
            );
            match task.compensate(completed_node.output.clone(), &ctx).await {
                Ok(()) => {
                    info!(node_id = %completed_node.node_id, "compensated");
                    self.storage
                        .append_event(EventRecord {
                            execution_id,
                            seq: 0,
                            wallclock: Utc::now(),
                            kind: EventKind::Compensated {
                                node_id: completed_node.node_id.clone(),
                            },
                        })
                        .await?;
                }
                Err(comp_err) => {
                    error!(node_id = %completed_node.node_id, error = %comp_err, "compensation failed");
                    self.storage
                        .append_event(EventRecord {
                            execution_id,
                            seq: 0,
                            wallclock: Utc::now(),
                            kind: EventKind::CompensationError {
                                node_id: completed_node.node_id.clone(),
                                detail: comp_err.to_string(),
                            },
                        })
                        .await?;
                }
            }
        }

        debug!(error_kind = failure.kind(), "compensation pass complete");
        exec.variables = variables.read().expect("variables lock poisoned").clone();
        Ok(())
    }

    async fn commit_success(&self, state: &Mutex<Execution>, node_id: &str, attempt: u32, output: Value) -> Result<()> {
        let mut exec = state.lock().await;
        let now = Utc::now();
        exec.record_success(node_id, output.clone(), now);
        exec.cursor = Some(node_id.to_string());
        let execution_id = exec.execution_id;
        let version = exec.take_snapshot_version();
        let blob = to_blob(&exec)?;
        self.storage.put_snapshot(execution_id, version, blob).await?;
        self.storage
            .append_event(EventRecord {
                execution_id,
                seq: 0,
                wallclock: now,
                kind: EventKind::NodeSucceeded {
                    node_id: node_id.to_string(),
                    attempt,
                    output_ref: output.clone(),
                },
            })
            .await?;
        self.storage
            .put_task_result(
                execution_id,
                TaskResult {
                    node_id: node_id.to_string(),
                    attempt,
                    outcome: TaskOutcome::Success { output },
                    recorded_at: now,
                },
            )
            .await?;
        Ok(())
    }

    async fn commit_failure(&self, state: &Mutex<Execution>, node_id: &str, attempt: u32, error: &EngineError) -> Result<()> {
        let mut exec = state.lock().await;
        let now = Utc::now();
        exec.record_failure(node_id, error.kind(), error.to_string(), now);
        exec.cursor = Some(node_id.to_string());
        let execution_id = exec.execution_id;
        let version = exec.take_snapshot_version();
        let blob = to_blob(&exec)?;
        self.storage.put_snapshot(execution_id, version, blob).await?;
        self.storage
            .put_task_result(
                execution_id,
                TaskResult {
                    node_id: node_id.to_string(),
                    attempt,
                    outcome: TaskOutcome::Failure {
                        error_kind: error.kind().to_string(),
                        detail: error.to_string(),
                    },
                    recorded_at: now,
                },
            )
            .await?;
        Ok(())
    }

    async fn record_started(&self, state: &Mutex<Execution>, node_id: &str, attempt: u32) -> Result<()> {
        let execution_id = state.lock().await.execution_id;
        self.storage
            .append_event(EventRecord {
                execution_id,
                seq: 0,
                wallclock: Utc::now(),
                kind: EventKind::NodeStarted {
                    node_id: node_id.to_string(),
                    attempt,
                },
            })
            .await?;
        Ok(())
    }

    async fn record_attempt_failed(&self, state: &Mutex<Execution>, node_id: &str, attempt: u32, error: &EngineError) -> Result<()> {
        let execution_id = state.lock().await.execution_id;
        self.storage
            .append_event(EventRecord {
                execution_id,
                seq: 0,
                wallclock: Utc::now(),
                kind: EventKind::NodeFailed {
                    node_id: node_id.to_string(),
                    attempt,
                    error_kind: error.kind().to_string(),
                    detail: error.to_string(),
                },
            })
            .await?;
        Ok(())
    }

    async fn record_retry_scheduled(&self, state: &Mutex<Execution>, node_id: &str, next_attempt: u32, delay_ms: u64) -> Result<()> {
        let execution_id = state.lock().await.execution_id;
        self.storage
            .append_event(EventRecord {
                execution_id,
                seq: 0,
                wallclock: Utc::now(),
                kind: EventKind::RetryScheduled {
                    node_id: node_id.to_string(),
                    next_attempt,
                    delay_ms,
                },
            })
            .await?;
        Ok(())
    }
}

fn to_blob(exec: &Execution) -> Result<Value> {
    serde_json::to_value(exec).map_err(|e| EngineError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowBuilder;
    use crate::context::CancelHandle;
    use crate::policy::{BackoffStrategy, RetryPolicy};
    use crate::schema::{PermissiveSchemaPort, Schema};
    use crate::task::{FnTask, TaskHandler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use workflow_storage::InMemoryStorage;

    fn scheduler(storage: Arc<dyn StoragePort>) -> Scheduler {
        Scheduler::new(
            storage,
            Arc::new(PermissiveSchemaPort),
            CircuitRegistry::new(),
            Arc::new(FlowRegistry::new()),
            SchedulerConfig::default(),
        )
    }

    fn double_task() -> TaskRef {
        Arc::new(FnTask::new(
            "double",
            Schema::any(),
            Schema::any(),
            |v, _ctx| {
                Box::pin(async move {
                    let value = v.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok(serde_json::json!({ "value": value * 2 }))
                })
            },
        ))
    }

    #[tokio::test]
    async fn sequential_doubling_reaches_completed_with_expected_output() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
        let plan = FlowBuilder::new(Schema::any())
            .then(double_task())
            .unwrap()
            .then(double_task())
            .unwrap()
            .compile()
            .unwrap();
        let exec = Execution::new("double-flow", serde_json::json!({"value": 3}), Utc::now());
        let (_handle, cancel) = CancelHandle::new();

        let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.completed.last().unwrap().output, serde_json::json!({"value": 12}));
    }

    struct FlakyTask {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for FlakyTask {
        fn task_id(&self) -> &str {
            "flaky"
        }
        fn input_schema(&self) -> &Schema {
            static S: std::sync::OnceLock<Schema> = std::sync::OnceLock::new();
            S.get_or_init(Schema::any)
        }
        fn output_schema(&self) -> &Schema {
            self.input_schema()
        }
        async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::TaskError {
                    node_id: "n".into(),
                    attempt: 1,
                    message: "not yet".into(),
                });
            }
            Ok(input)
        }
        fn retry_policy(&self) -> Option<RetryPolicy> {
            Some(RetryPolicy::new(3, BackoffStrategy::Fixed { delay_ms: 1 }))
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds_within_budget() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
        let task: TaskRef = Arc::new(FlakyTask {
            failures_remaining: AtomicU32::new(2),
        });
        let plan = FlowBuilder::new(Schema::any()).then(task).unwrap().compile().unwrap();
        let exec = Execution::new("flaky-flow", serde_json::json!({"value": 1}), Utc::now());
        let (_handle, cancel) = CancelHandle::new();

        let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn branch_with_no_matching_arm_fails_without_retry() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
        let plan = FlowBuilder::new(Schema::any())
            .branch(vec![(Arc::new(|_v: &Value| false), double_task().into())])
            .unwrap()
            .compile()
            .unwrap();
        let exec = Execution::new("branch-flow", serde_json::json!({"value": 1}), Utc::now());
        let (_handle, cancel) = CancelHandle::new();

        let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].error_detail.contains(NO_MATCHING_BRANCH), true);
    }

    #[tokio::test]
    async fn parallel_preserves_declared_order_regardless_of_completion_order() {
        let storage: Arc<dyn StoragePort> = Arc::new(InMemoryStorage::new());
        let slow = Arc::new(FnTask::new("slow", Schema::any(), Schema::any(), |v, _ctx| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(v)
            })
        })) as TaskRef;
        let fast = Arc::new(FnTask::new("fast", Schema::any(), Schema::any(), |v, _ctx| {
            Box::pin(async move { Ok(v) })
        })) as TaskRef;

        let plan = FlowBuilder::new(Schema::any())
            .parallel(vec![slow.into(), fast.into()])
            .unwrap()
            .compile()
            .unwrap();
        let exec = Execution::new("parallel-flow", serde_json::json!(1), Utc::now());
        let (_handle, cancel) = CancelHandle::new();

        let result = scheduler(storage).run(&plan, exec, cancel).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.completed.last().unwrap().output, serde_json::json!([1, 1]));
    }
}
