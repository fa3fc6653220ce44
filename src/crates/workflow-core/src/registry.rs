//! Flow registry — an explicit object, not hidden module-level state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{CompileError, Result};
use crate::graph::Plan;
use crate::schema::Schema;

#[derive(Clone)]
struct RegisteredFlow {
    plan: Arc<Plan>,
    input_schema: Schema,
}

/// Holds every compiled [`Plan`] a host has registered, keyed by
/// `flow_id`. A host constructs one, registers flows at startup, and
/// passes it (or an [`crate::engine::Engine`] wrapping it) to whatever
/// serves the control-plane operations.
#[derive(Clone, Default)]
pub struct FlowRegistry {
    flows: Arc<RwLock<HashMap<String, RegisteredFlow>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, flow_id: impl Into<String>, plan: Plan, input_schema: Schema) {
        let flow_id = flow_id.into();
        self.flows.write().expect("registry lock poisoned").insert(
            flow_id,
            RegisteredFlow {
                plan: Arc::new(plan),
                input_schema,
            },
        );
    }

    pub fn get(&self, flow_id: &str) -> Option<Arc<Plan>> {
        self.flows
            .read()
            .expect("registry lock poisoned")
            .get(flow_id)
            .map(|f| f.plan.clone())
    }

    pub fn get_checked(&self, flow_id: &str) -> Result<Arc<Plan>> {
        self.get(flow_id)
            .ok_or_else(|| CompileError::UnknownFlowRef(flow_id.to_string()).into())
    }

    pub fn input_schema(&self, flow_id: &str) -> Option<Schema> {
        self.flows
            .read()
            .expect("registry lock poisoned")
            .get(flow_id)
            .map(|f| f.input_schema.clone())
    }

    pub fn list(&self) -> Vec<String> {
        self.flows.read().expect("registry lock poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowBuilder;
    use crate::task::FnTask;
    use std::sync::Arc as StdArc;

    fn noop_task(id: &str) -> crate::task::TaskRef {
        StdArc::new(FnTask::new(
            id.to_string(),
            Schema::any(),
            Schema::any(),
            |v, _ctx| Box::pin(async move { Ok(v) }),
        ))
    }

    #[test]
    fn register_then_get_roundtrips() {
        let registry = FlowRegistry::new();
        let plan = FlowBuilder::new(Schema::any()).then(noop_task("t1")).unwrap().compile().unwrap();
        registry.register("flow-a", plan, Schema::any());
        assert!(registry.get("flow-a").is_some());
        assert!(registry.get("flow-b").is_none());
        assert_eq!(registry.list(), vec!["flow-a".to_string()]);
    }
}
