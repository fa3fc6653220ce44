//! Exclusive execution leases
//!
//! A lease grants one scheduler instance the sole right to advance a given
//! execution. The storage backend is the only thing that can arbitrate
//! leases across processes;
//! in-process, the type here is just a token passed back to `renew_lease`
//! and `release_lease`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle returned by [`acquire_lease`](crate::StoragePort::acquire_lease).
///
/// Holding a valid `LeaseToken` is what makes it safe to call
/// `put_snapshot`/`append_event`/`put_task_result` for the execution it
/// names. A token that has expired or been released is no longer valid;
/// operations against it fail with `StorageError::LeaseLost`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    pub execution_id: Uuid,
    pub owner: String,
    /// Opaque value the backend uses to detect stale renew/release calls
    /// (e.g. a fencing token). Not interpreted by callers.
    pub fencing: u64,
}

/// A lease record as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
