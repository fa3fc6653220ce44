//! # workflow-storage — the durable storage port
//!
//! This crate defines [`StoragePort`], the single abstract contract the
//! execution engine (`workflow-core`) depends on for durability: immutable
//! snapshots, an append-only event log, per-attempt task result records,
//! execution listings, and the exclusive lease that makes "no two
//! schedulers ever drive the same execution at once" a storage-enforced
//! guarantee rather than an in-process assumption.
//!
//! It also ships [`InMemoryStorage`], a reference implementation used by
//! this crate's own tests, by `workflow-core`'s integration tests, and
//! suitable for embedding in hosts that don't need cross-restart
//! durability. Production hosts implement [`StoragePort`] against
//! Postgres, SQLite, a KV store, or whatever they already run.
//!
//! ## Why a port, not a concrete backend
//!
//! The engine writes a snapshot at every node transition — that write is
//! the crash-safety unit. Everything about *how* that write lands on disk
//! (which database, which schema, which retry behavior on connection loss)
//! is a host concern; the engine only needs the nine operations on
//! [`StoragePort`] to hold their documented semantics.
//!
//! ```rust,ignore
//! use workflow_storage::{InMemoryStorage, StoragePort};
//! use uuid::Uuid;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStorage::new();
//! let execution_id = Uuid::new_v4();
//!
//! storage.put_snapshot(execution_id, 0, json!({"status": "pending"})).await?;
//! let (version, blob) = storage.latest_snapshot(execution_id).await?.unwrap();
//! assert_eq!(version, 0);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod filter;
pub mod lease;
pub mod memory;
pub mod task_result;
pub mod traits;

pub use error::{Result, StorageError};
pub use events::{EventKind, EventRecord};
pub use filter::{ExecutionFilter, ExecutionSummary, Page, PagedExecutions};
pub use lease::{Lease, LeaseToken};
pub use memory::InMemoryStorage;
pub use task_result::{TaskOutcome, TaskResult};
pub use traits::StoragePort;
