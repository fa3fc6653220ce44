//! The abstract storage contract the engine depends on
//!
//! `StoragePort` is the one seam between the execution engine and durable
//! storage. The engine never talks to a database directly —
//! it only ever calls through this trait, so hosts can back executions
//! with Postgres, SQLite, a KV store, or (for tests) memory, without the
//! scheduler knowing the difference.
//!
//! # Crash-safety unit
//!
//! A snapshot is written at every node transition; that write (plus the
//! event that caused it) is the atomic unit a crash can interrupt without
//! corrupting state. `put_snapshot` is required to fail outright if the
//! `(execution_id, version)` pair already exists — the engine relies on
//! that to detect a prior crash mid-write and refuse to silently overwrite
//! history (Testable Property 3: snapshot immutability).
//!
//! # Implementing a custom backend
//!
//! ```rust,ignore
//! use workflow_storage::{StoragePort, StorageError};
//! use async_trait::async_trait;
//!
//! struct PostgresStorage { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl StoragePort for PostgresStorage {
//!     async fn put_snapshot(&self, execution_id: Uuid, version: u64, blob: serde_json::Value) -> Result<(), StorageError> {
//!         // INSERT ... ON CONFLICT DO NOTHING, check rows_affected
//!         todo!()
//!     }
//!     // ...
//! }
//! ```

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::events::EventRecord;
use crate::filter::{ExecutionFilter, Page, PagedExecutions};
use crate::lease::LeaseToken;
use crate::task_result::TaskResult;

#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Append an immutable snapshot at a monotonic version. Must fail with
    /// `StorageError::VersionConflict` if `(execution_id, version)` already
    /// exists.
    async fn put_snapshot(
        &self,
        execution_id: Uuid,
        version: u64,
        blob: serde_json::Value,
    ) -> Result<()>;

    /// The highest-version snapshot for an execution, or `Ok(None)` if the
    /// execution has never been snapshotted.
    async fn latest_snapshot(&self, execution_id: Uuid) -> Result<Option<(u64, serde_json::Value)>>;

    /// Append to the ordered event log. The backend assigns the monotonic
    /// `seq`; the `seq` on the input record is ignored.
    async fn append_event(&self, event: EventRecord) -> Result<EventRecord>;

    /// Ordered iterator (materialized as a `Vec` here; a streaming backend
    /// may page internally) over events with `seq >= from_seq`.
    async fn read_events(&self, execution_id: Uuid, from_seq: u64) -> Result<Vec<EventRecord>>;

    /// Record an attempt outcome for a node.
    async fn put_task_result(&self, execution_id: Uuid, result: TaskResult) -> Result<()>;

    /// Paginated listing by flow_id / status / time range.
    async fn list_executions(&self, filter: ExecutionFilter, page: Page) -> Result<PagedExecutions>;

    /// Remove all records for an execution. Must fail with
    /// `StorageError::LeaseHeld` while a lease is held.
    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// Acquire an exclusive, single-owner, TTL-bounded lease.
    async fn acquire_lease(&self, execution_id: Uuid, owner: &str, ttl_ms: u64) -> Result<LeaseToken>;

    /// Extend a held lease's TTL from now.
    async fn renew_lease(&self, token: &LeaseToken, ttl_ms: u64) -> Result<LeaseToken>;

    /// Release a held lease, allowing another owner to acquire it.
    async fn release_lease(&self, token: &LeaseToken) -> Result<()>;
}
