//! `Engine` — the process-wide control-plane handle
//!
//! `Engine` is the thing a host (an out-of-scope HTTP layer, a CLI, an
//! embedding application) actually holds: one `FlowRegistry`, one
//! `Arc<dyn StoragePort>`, one process-wide `CircuitRegistry`, and a
//! `tokio::sync::Semaphore` bounding how many executions it drives at once.
//! It exposes the control-plane operation set as plain async methods:
//! `register_flow`, `list_flows`, `start_execution`, `pause`, `resume`,
//! `delete`, `describe_execution`, `list_executions`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, Semaphore};

use workflow_storage::{ExecutionFilter, Page, PagedExecutions, StoragePort};

use crate::config::SchedulerConfig;
use crate::context::CancelHandle;
use crate::error::{EngineError, Result};
use crate::execution::{Execution, ExecutionStatus};
use crate::graph::Plan;
use crate::policy::CircuitRegistry;
use crate::registry::FlowRegistry;
use crate::schema::{Schema, SchemaPort};
use crate::scheduler::Scheduler;

/// Bookkeeping `Engine` keeps for a live execution so `pause` can reach it:
/// the cancel handle that fires the cooperative signal the scheduler's
/// tasks poll, and the execution's flow id (for diagnostics).
struct LiveExecution {
    flow_id: String,
    cancel: CancelHandle,
}

/// The process-wide control-plane handle.
///
/// Cloning an `Engine` is cheap — every field is `Arc`-backed or `Clone`
/// itself — and every clone shares the same registry, storage, circuit
/// state, and worker-pool semaphore: there is exactly one logical
/// process-wide handle no matter how many `Engine` values exist.
#[derive(Clone)]
pub struct Engine {
    storage: Arc<dyn StoragePort>,
    schema_port: Arc<dyn SchemaPort>,
    registry: Arc<FlowRegistry>,
    circuits: CircuitRegistry,
    config: SchedulerConfig,
    worker_pool: Arc<Semaphore>,
    live: Arc<Mutex<HashMap<uuid::Uuid, LiveExecution>>>,
}

impl Engine {
    pub fn new(storage: Arc<dyn StoragePort>, schema_port: Arc<dyn SchemaPort>, config: SchedulerConfig) -> Self {
        let worker_pool = Arc::new(Semaphore::new(config.worker_pool_width.max(1)));
        Self {
            storage,
            schema_port,
            registry: Arc::new(FlowRegistry::new()),
            circuits: CircuitRegistry::new(),
            config,
            worker_pool,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a compiled plan under `flow_id`, making it startable and
    /// resolvable as a `Nested` target.
    pub fn register_flow(&self, flow_id: impl Into<String>, plan: Plan, input_schema: Schema) {
        self.registry.register(flow_id, plan, input_schema);
    }

    pub fn list_flows(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Create a fresh `Execution`, acquire its lease, and drive it to a
    /// terminal (or paused) status through one `Scheduler::run` call,
    /// bounded by the worker pool semaphore.
    pub async fn start_execution(&self, flow_id: &str, input: Value) -> Result<Execution> {
        let plan = self.registry.get_checked(flow_id)?;
        let exec = Execution::new(flow_id, input, Utc::now());
        self.drive(plan, exec).await
    }

    /// Re-acquire the lease for a previously paused (or crashed) execution
    /// and resume driving it from its latest snapshot.
    pub async fn resume(&self, execution_id: uuid::Uuid) -> Result<Execution> {
        let (_version, blob) = self
            .storage
            .latest_snapshot(execution_id)
            .await?
            .ok_or_else(|| EngineError::Storage(format!("no snapshot recorded for execution {execution_id}")))?;
        let exec: Execution =
            serde_json::from_value(blob).map_err(|e| EngineError::Storage(e.to_string()))?;
        if exec.status.is_terminal() {
            return Ok(exec);
        }
        let plan = self.registry.get_checked(&exec.flow_id)?;
        self.drive(plan, exec).await
    }

    async fn drive(&self, plan: Arc<Plan>, exec: Execution) -> Result<Execution> {
        let execution_id = exec.execution_id;
        let owner = format!("engine:{execution_id}");
        let lease = self
            .storage
            .acquire_lease(execution_id, &owner, self.config.lease_ttl_ms)
            .await?;

        let (cancel_handle, cancel_signal) = CancelHandle::new();
        {
            let mut live = self.live.lock().await;
            live.insert(
                execution_id,
                LiveExecution {
                    flow_id: exec.flow_id.clone(),
                    cancel: cancel_handle,
                },
            );
        }

        let _permit = self.worker_pool.acquire().await.expect("worker pool semaphore closed");

        // Keeps the lease alive for executions that run longer than its
        // TTL; stopped as soon as the scheduler returns.
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let renew_storage = self.storage.clone();
        let renew_interval = Duration::from_millis(self.config.lease_renew_interval_ms);
        let ttl_ms = self.config.lease_ttl_ms;
        let lease_for_release = lease.clone();
        let renew_handle = tokio::spawn(async move {
            let mut current = lease;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return current,
                    _ = tokio::time::sleep(renew_interval) => {
                        match renew_storage.renew_lease(&current, ttl_ms).await {
                            Ok(renewed) => current = renewed,
                            Err(_) => return current,
                        }
                    }
                }
            }
        });

        let scheduler = Scheduler::new(
            self.storage.clone(),
            self.schema_port.clone(),
            self.circuits.clone(),
            self.registry.clone(),
            self.config.clone(),
        );
        let result = scheduler.run(&plan, exec, cancel_signal).await;

        self.live.lock().await.remove(&execution_id);
        let _ = stop_tx.send(());
        let final_lease = renew_handle.await.unwrap_or(lease_for_release);
        let _ = self.storage.release_lease(&final_lease).await;

        result
    }

    /// Fire the cooperative cancel signal for a live execution. A no-op
    /// (returns `Ok(())`) if the execution isn't currently being driven by
    /// this `Engine` instance — pausing an execution another process owns
    /// is out of scope (cross-execution coordination is not handled here).
    pub async fn pause(&self, execution_id: uuid::Uuid) -> Result<()> {
        if let Some(live) = self.live.lock().await.get(&execution_id) {
            live.cancel.cancel();
        }
        Ok(())
    }

    pub async fn delete(&self, execution_id: uuid::Uuid) -> Result<()> {
        self.storage.delete_execution(execution_id).await?;
        Ok(())
    }

    /// The latest known state of an execution, reconstructed from its
    /// newest snapshot.
    pub async fn describe_execution(&self, execution_id: uuid::Uuid) -> Result<Execution> {
        let (_version, blob) = self
            .storage
            .latest_snapshot(execution_id)
            .await?
            .ok_or_else(|| EngineError::Storage(format!("no snapshot recorded for execution {execution_id}")))?;
        serde_json::from_value(blob).map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn list_executions(&self, filter: ExecutionFilter, page: Page) -> Result<PagedExecutions> {
        Ok(self.storage.list_executions(filter, page).await?)
    }
}
