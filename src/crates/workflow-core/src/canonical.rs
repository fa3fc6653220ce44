//! Canonical payload encoding
//!
//! `serde_json::Value`'s object variant is backed by a `BTreeMap` unless
//! the `preserve_order` feature is enabled on `serde_json` — which this
//! workspace never turns on — so keys already serialize in sorted order.
//! This module exists to make that guarantee explicit and give the rest
//! of the crate one place to depend on it, rather than scattering the
//! assumption across every `put_snapshot` call site.

use serde_json::Value;

use crate::error::{EngineError, Result};

/// The byte-identical encoding used for snapshot comparison (Testable
/// Property 1: replaying the event log reproduces every snapshot
/// byte-for-byte) and for anything else that needs a stable digest of a
/// payload.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| EngineError::Storage(e.to_string()))
}

pub fn canonical_string(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| EngineError::Storage(e.to_string()))
}
