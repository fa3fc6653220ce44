//! In-memory reference implementation of [`StoragePort`]
//!
//! Thread-safe (`Arc<RwLock<...>>`), ephemeral, zero external dependencies.
//! Intended for unit/integration tests, examples, and small single-process
//! embeddings — not for production durability (there is nothing behind
//! this but process memory, so a crash loses everything). A production
//! host supplies its own `StoragePort` backed by real storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::events::EventRecord;
use crate::filter::{ExecutionFilter, Page, PagedExecutions};
use crate::lease::{Lease, LeaseToken};
use crate::task_result::TaskResult;
use crate::traits::StoragePort;

#[derive(Default)]
struct ExecutionRecords {
    snapshots: Vec<(u64, serde_json::Value)>,
    events: Vec<EventRecord>,
    task_results: Vec<TaskResult>,
    flow_id: Option<String>,
    status: Option<String>,
}

#[derive(Default)]
struct Inner {
    executions: HashMap<Uuid, ExecutionRecords>,
    leases: HashMap<Uuid, Lease>,
    next_fencing: u64,
}

/// In-memory [`StoragePort`]. Cheap to clone (internally `Arc`-shared).
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all stored state. Test-isolation helper.
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        *guard = Inner::default();
    }

    /// Best-effort status/flow_id extraction from the latest snapshot blob,
    /// used to serve `list_executions` without the backend knowing the
    /// `Execution` struct's Rust type.
    fn index_snapshot(rec: &mut ExecutionRecords, blob: &serde_json::Value) {
        if let Some(flow_id) = blob.get("flow_id").and_then(|v| v.as_str()) {
            rec.flow_id = Some(flow_id.to_string());
        }
        if let Some(status) = blob.get("status").and_then(|v| v.as_str()) {
            rec.status = Some(status.to_string());
        }
    }
}

#[async_trait]
impl StoragePort for InMemoryStorage {
    async fn put_snapshot(
        &self,
        execution_id: Uuid,
        version: u64,
        blob: serde_json::Value,
    ) -> Result<()> {
        let mut guard = self.inner.write().await;
        let rec = guard.executions.entry(execution_id).or_default();
        if rec.snapshots.iter().any(|(v, _)| *v == version) {
            return Err(StorageError::VersionConflict {
                execution_id: execution_id.to_string(),
                version,
            });
        }
        Self::index_snapshot(rec, &blob);
        rec.snapshots.push((version, blob));
        Ok(())
    }

    async fn latest_snapshot(&self, execution_id: Uuid) -> Result<Option<(u64, serde_json::Value)>> {
        let guard = self.inner.read().await;
        Ok(guard
            .executions
            .get(&execution_id)
            .and_then(|rec| rec.snapshots.iter().max_by_key(|(v, _)| *v).cloned()))
    }

    async fn append_event(&self, mut event: EventRecord) -> Result<EventRecord> {
        let mut guard = self.inner.write().await;
        let rec = guard.executions.entry(event.execution_id).or_default();
        let next_seq = rec.events.last().map(|e| e.seq + 1).unwrap_or(0);
        event.seq = next_seq;
        if event.wallclock.timestamp_nanos_opt().is_none() {
            event.wallclock = Utc::now();
        }
        rec.events.push(event.clone());
        Ok(event)
    }

    async fn read_events(&self, execution_id: Uuid, from_seq: u64) -> Result<Vec<EventRecord>> {
        let guard = self.inner.read().await;
        Ok(guard
            .executions
            .get(&execution_id)
            .map(|rec| {
                rec.events
                    .iter()
                    .filter(|e| e.seq >= from_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_task_result(&self, execution_id: Uuid, result: TaskResult) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard
            .executions
            .entry(execution_id)
            .or_default()
            .task_results
            .push(result);
        Ok(())
    }

    async fn list_executions(&self, filter: ExecutionFilter, page: Page) -> Result<PagedExecutions> {
        let guard = self.inner.read().await;
        let mut items: Vec<_> = guard
            .executions
            .iter()
            .filter(|(_, rec)| {
                filter
                    .flow_id
                    .as_ref()
                    .map(|f| rec.flow_id.as_deref() == Some(f.as_str()))
                    .unwrap_or(true)
                    && filter
                        .status
                        .as_ref()
                        .map(|s| rec.status.as_deref() == Some(s.as_str()))
                        .unwrap_or(true)
            })
            .filter_map(|(id, rec)| {
                let (_, blob) = rec.snapshots.iter().max_by_key(|(v, _)| *v)?;
                let created_at = blob
                    .get("created_at")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(Utc::now);
                let updated_at = blob
                    .get("updated_at")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(created_at);
                if filter.created_after.is_some_and(|after| created_at < after)
                    || filter.created_before.is_some_and(|before| created_at > before)
                {
                    return None;
                }
                Some(crate::filter::ExecutionSummary {
                    execution_id: *id,
                    flow_id: rec.flow_id.clone().unwrap_or_default(),
                    status: rec.status.clone().unwrap_or_default(),
                    created_at,
                    updated_at,
                })
            })
            .collect();
        items.sort_by_key(|s| s.created_at);
        let total = items.len();
        let page_items = items
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(PagedExecutions {
            items: page_items,
            total,
        })
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.leases.contains_key(&execution_id) {
            return Err(StorageError::LeaseHeld(execution_id.to_string()));
        }
        guard.executions.remove(&execution_id);
        Ok(())
    }

    async fn acquire_lease(&self, execution_id: Uuid, owner: &str, ttl_ms: u64) -> Result<LeaseToken> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        if let Some(existing) = guard.leases.get(&execution_id) {
            if !existing.is_expired(now) {
                return Err(StorageError::LeaseLost(execution_id.to_string()));
            }
        }
        guard.next_fencing += 1;
        let token = LeaseToken {
            execution_id,
            owner: owner.to_string(),
            fencing: guard.next_fencing,
        };
        let lease = Lease {
            token: token.clone(),
            expires_at: now + chrono::Duration::milliseconds(ttl_ms as i64),
        };
        guard.leases.insert(execution_id, lease);
        Ok(token)
    }

    async fn renew_lease(&self, token: &LeaseToken, ttl_ms: u64) -> Result<LeaseToken> {
        let mut guard = self.inner.write().await;
        match guard.leases.get_mut(&token.execution_id) {
            Some(lease) if lease.token.fencing == token.fencing => {
                lease.expires_at = Utc::now() + chrono::Duration::milliseconds(ttl_ms as i64);
                Ok(lease.token.clone())
            }
            _ => Err(StorageError::LeaseLost(token.execution_id.to_string())),
        }
    }

    async fn release_lease(&self, token: &LeaseToken) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(lease) = guard.leases.get(&token.execution_id) {
            if lease.token.fencing == token.fencing {
                guard.leases.remove(&token.execution_id);
            }
        }
        Ok(())
    }
}
