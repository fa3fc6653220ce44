//! # workflow-core
//!
//! The graph compiler, scheduler, and durable execution model for a
//! workflow orchestration engine: a user-declared directed graph of tasks,
//! built with a fluent composition API, executed statefully and resumably
//! across process restarts.
//!
//! ## Architecture
//!
//! - [`schema`] — the Schema Port (C1): validates task payloads against a
//!   JSON Schema document, pluggable behind [`schema::SchemaPort`].
//! - [`task`] — the executable unit ([`task::TaskHandler`]) every node in a
//!   plan invokes.
//! - [`graph`] — the Graph Model (C3): the immutable, compiled [`graph::Plan`].
//! - [`builder`] — the Fluent Compiler (C4): [`builder::FlowBuilder`] turns
//!   composition calls into a [`graph::Plan`].
//! - [`policy`] — retry and circuit-breaker policies (C5).
//! - [`scheduler`] — the Scheduler/Executor (C6): [`scheduler::Scheduler`]
//!   drives a [`graph::Plan`]/[`execution::Execution`] pair to completion.
//! - [`execution`] and [`context`] — the runtime record and per-attempt
//!   context every task execution observes.
//! - [`registry`] — [`registry::FlowRegistry`], the explicit object a host
//!   registers compiled flows with.
//! - [`engine`] — [`engine::Engine`], the process-wide handle wrapping all
//!   of the above behind the control-plane operation set.
//!
//! Durability lives in the sibling `workflow-storage` crate, behind the
//! [`workflow_storage::StoragePort`] contract this crate depends on but
//! never assumes a concrete backend for.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workflow_core::builder::FlowBuilder;
//! use workflow_core::engine::Engine;
//! use workflow_core::schema::{PermissiveSchemaPort, Schema};
//! use workflow_core::config::SchedulerConfig;
//! use workflow_storage::InMemoryStorage;
//!
//! # async fn example(double_task: workflow_core::task::TaskRef) -> workflow_core::error::Result<()> {
//! let plan = FlowBuilder::new(Schema::any()).then(double_task)?.compile()?;
//!
//! let engine = Engine::new(
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(PermissiveSchemaPort),
//!     SchedulerConfig::default(),
//! );
//! engine.register_flow("double-flow", plan, Schema::any());
//! let exec = engine.start_execution("double-flow", serde_json::json!({"value": 5})).await?;
//! assert_eq!(exec.status, workflow_core::execution::ExecutionStatus::Completed);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod canonical;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod scheduler;
pub mod task;

pub use builder::FlowBuilder;
pub use config::SchedulerConfig;
pub use engine::Engine;
pub use error::{CompileError, EngineError, Result};
pub use execution::{Execution, ExecutionStatus};
pub use graph::{Node, NodeId, Plan};
pub use registry::FlowRegistry;
pub use scheduler::Scheduler;
pub use task::{TaskHandler, TaskRef};
