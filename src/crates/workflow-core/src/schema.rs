//! Schema Port (C1) — validating payloads against a declared schema
//!
//! The engine never inspects user payloads beyond what it needs to route
//! and bind values between nodes; actual structural validation is
//! delegated to whatever the host considers "a schema". This module
//! defines the [`Schema`] value (a JSON Schema document) and the
//! [`SchemaPort`] trait the compiler and scheduler validate through.
//!
//! Deep type-validation of user payloads is a host concern — hosts may
//! swap in their own validator. The `json-schema` feature (on by default)
//! wires in the `jsonschema` crate so the engine is useful standalone.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{EngineError, Result};

/// A JSON Schema document, shared cheaply across tasks — schemas are
/// value-like and reusable.
#[derive(Debug, Clone)]
pub struct Schema {
    document: Arc<Value>,
}

impl Schema {
    pub fn new(document: Value) -> Self {
        Self {
            document: Arc::new(document),
        }
    }

    /// The schema that accepts any value — the universal supertype used
    /// when the compiler cannot statically unify divergent branch outputs.
    pub fn any() -> Self {
        Self::new(serde_json::json!({}))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The declared `"type"` keyword, if present. `None` means "any type"
    /// for the purposes of the compiler's static compatibility check.
    pub fn type_tag(&self) -> Option<&str> {
        self.document.get("type").and_then(|v| v.as_str())
    }

    /// Conservative static compatibility check used by the fluent
    /// compiler. This is *not* a substitute for runtime validation — it
    /// only catches outright conflicting concrete types at compile time.
    pub fn is_statically_compatible_with(&self, other: &Schema) -> bool {
        match (self.type_tag(), other.type_tag()) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }

    /// Validate a value against this schema via the schema port.
    pub fn validate(&self, value: &Value, port: &dyn SchemaPort) -> Result<Value> {
        port.validate(self, value)
    }
}

/// Validates a payload against a [`Schema`], producing a normalized value
/// or a `ValidationError`. The engine calls this once per task input and
/// once per task output.
pub trait SchemaPort: Send + Sync {
    fn validate(&self, schema: &Schema, value: &Value) -> Result<Value>;
}

/// `SchemaPort` backed by the `jsonschema` crate.
#[cfg(feature = "json-schema")]
pub struct JsonSchemaPort;

#[cfg(feature = "json-schema")]
impl SchemaPort for JsonSchemaPort {
    fn validate(&self, schema: &Schema, value: &Value) -> Result<Value> {
        let compiled = jsonschema::JSONSchema::compile(schema.document()).map_err(|e| {
            EngineError::ValidationError {
                node_id: String::new(),
                message: format!("invalid schema: {e}"),
            }
        })?;
        if let Err(errors) = compiled.validate(value) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::ValidationError {
                node_id: String::new(),
                message: detail,
            });
        }
        Ok(value.clone())
    }
}

/// `SchemaPort` that accepts every payload unvalidated. Useful for tests
/// and for hosts that validate elsewhere.
pub struct PermissiveSchemaPort;

impl SchemaPort for PermissiveSchemaPort {
    fn validate(&self, _schema: &Schema, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}
