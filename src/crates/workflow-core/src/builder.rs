//! Fluent Compiler (C4) — composition calls to a compiled [`Plan`]
//!
//! [`FlowBuilder`] is the primary API for constructing workflows. Each
//! terminal operation (`then`, `branch`, `parallel`, `while_`, `for_each`,
//! `nested`) appends one [`Node`] to a growing plan and returns the same
//! builder for chaining, checking type compatibility against the running
//! tail schema as it goes.
//!
//! ```rust,ignore
//! use workflow_core::builder::FlowBuilder;
//! use workflow_core::schema::Schema;
//!
//! let plan = FlowBuilder::new(Schema::new(serde_json::json!({"type": "object"})))
//!     .then(double_task)
//!     .then(double_task)
//!     .compile()?;
//! ```

use std::collections::HashSet;

use crate::error::{CompileError, Result};
use crate::graph::{BranchArm, Node, NodeId, Plan, Predicate};
use crate::schema::Schema;
use crate::task::TaskRef;

/// Either a single task or an already-compiled sub-plan — what `branch`,
/// `parallel`, `while_`, and `for_each` accept per arm. A sub-plan is
/// built by standing up a fresh
/// `FlowBuilder` and calling `.compile()` before handing the result here.
pub enum Invocable {
    Task(TaskRef),
    Plan(Plan),
}

impl From<TaskRef> for Invocable {
    fn from(task: TaskRef) -> Self {
        Invocable::Task(task)
    }
}

impl From<Plan> for Invocable {
    fn from(plan: Plan) -> Self {
        Invocable::Plan(plan)
    }
}

impl Invocable {
    fn into_plan(self) -> Plan {
        match self {
            Invocable::Task(task) => {
                let input_schema = task.input_schema().clone();
                let output_schema = task.output_schema().clone();
                Plan {
                    nodes: vec![Node::Step {
                        id: String::new(),
                        task,
                    }],
                    input_schema,
                    output_schema,
                }
            }
            Invocable::Plan(plan) => plan,
        }
    }

    fn input_schema(&self) -> Schema {
        match self {
            Invocable::Task(t) => t.input_schema().clone(),
            Invocable::Plan(p) => p.input_schema.clone(),
        }
    }

    fn output_schema(&self) -> Schema {
        match self {
            Invocable::Task(t) => t.output_schema().clone(),
            Invocable::Plan(p) => p.output_schema.clone(),
        }
    }
}

/// Builder for a [`Plan`]. Not `Clone`; build one plan per flow.
pub struct FlowBuilder {
    nodes: Vec<Node>,
    input_schema: Schema,
    tail_schema: Schema,
}

impl FlowBuilder {
    pub fn new(input_schema: Schema) -> Self {
        Self {
            nodes: Vec::new(),
            tail_schema: input_schema.clone(),
            input_schema,
        }
    }

    fn check_compatible(&self, incoming: &Schema, context: &str) -> Result<()> {
        if self.tail_schema.is_statically_compatible_with(incoming) {
            Ok(())
        } else {
            Err(CompileError::TypeMismatch {
                from_node: format!("tail({})", self.tail_schema.type_tag().unwrap_or("any")),
                to_node: context.to_string(),
            }
            .into())
        }
    }

    /// Append `Step(task)`.
    pub fn then(mut self, task: TaskRef) -> Result<Self> {
        self.check_compatible(task.input_schema(), task.task_id())?;
        self.tail_schema = task.output_schema().clone();
        self.nodes.push(Node::Step {
            id: String::new(),
            task,
        });
        Ok(self)
    }

    /// Append `Branch`. Every arm's input type must match the current
    /// value type; arm output types must unify.
    pub fn branch(
        mut self,
        arms: Vec<(Predicate, Invocable)>,
    ) -> Result<Self> {
        if arms.is_empty() {
            return Err(CompileError::EmptyPlan.into());
        }
        let mut compiled_arms = Vec::with_capacity(arms.len());
        let mut distinct_output_tags: HashSet<String> = HashSet::new();
        for (predicate, invocable) in arms {
            let arm_input = invocable.input_schema();
            self.check_compatible(&arm_input, "branch arm")?;
            let arm_output = invocable.output_schema();
            if let Some(tag) = arm_output.type_tag() {
                distinct_output_tags.insert(tag.to_string());
            }
            compiled_arms.push(BranchArm {
                predicate,
                plan: invocable.into_plan(),
            });
        }
        if distinct_output_tags.len() > 1 {
            return Err(CompileError::BranchTypeDivergence {
                detail: format!("arms produce incompatible types: {distinct_output_tags:?}"),
            }
            .into());
        }
        let output_schema = match distinct_output_tags.into_iter().next() {
            Some(tag) => Schema::new(serde_json::json!({ "type": tag })),
            None => Schema::any(),
        };
        self.tail_schema = output_schema.clone();
        self.nodes.push(Node::Branch {
            id: String::new(),
            arms: compiled_arms,
            output_schema,
        });
        Ok(self)
    }

    /// Append `Parallel`. All arms must accept the current value; the
    /// resulting tail value is the ordered list of arm outputs.
    pub fn parallel(mut self, arms: Vec<Invocable>) -> Result<Self> {
        if arms.is_empty() {
            return Err(CompileError::EmptyPlan.into());
        }
        let mut compiled_arms = Vec::with_capacity(arms.len());
        for invocable in arms {
            let arm_input = invocable.input_schema();
            self.check_compatible(&arm_input, "parallel arm")?;
            compiled_arms.push(invocable.into_plan());
        }
        self.tail_schema = Schema::new(serde_json::json!({ "type": "array" }));
        self.nodes.push(Node::Parallel {
            id: String::new(),
            arms: compiled_arms,
        });
        Ok(self)
    }

    /// Append `While`. The sub-plan's output type must equal its input
    /// type (loop invariant).
    pub fn while_(mut self, predicate: Predicate, body: Invocable) -> Result<Self> {
        let body_input = body.input_schema();
        self.check_compatible(&body_input, "while body")?;
        let body_output = body.output_schema();
        if body_input.type_tag() != body_output.type_tag() {
            return Err(CompileError::LoopInvariantViolation {
                detail: format!(
                    "body input type {:?} != output type {:?}",
                    body_input.type_tag(),
                    body_output.type_tag()
                ),
            }
            .into());
        }
        self.tail_schema = body_output;
        self.nodes.push(Node::While {
            id: String::new(),
            predicate,
            body: Box::new(body.into_plan()),
        });
        Ok(self)
    }

    /// Append `ForEach`. Requires the current value type to be a sequence.
    /// `concurrency` bounds how many elements execute at once — callers
    /// pass [`crate::config::SchedulerConfig::default_foreach_concurrency`]
    /// (default `1`) when they don't need more.
    pub fn for_each(mut self, body: Invocable, concurrency: usize) -> Result<Self> {
        if self.tail_schema.type_tag().is_some_and(|t| t != "array") {
            return Err(CompileError::ForEachRequiresSequence {
                actual_type: self.tail_schema.type_tag().unwrap_or("any").to_string(),
            }
            .into());
        }
        self.tail_schema = Schema::new(serde_json::json!({ "type": "array" }));
        self.nodes.push(Node::ForEach {
            id: String::new(),
            body: Box::new(body.into_plan()),
            concurrency: concurrency.max(1),
        });
        Ok(self)
    }

    /// Append `Nested(flow_ref)`, treated as a `Step` whose input/output
    /// types match the embedded flow's declared schemas.
    pub fn nested(
        mut self,
        flow_ref: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
    ) -> Result<Self> {
        self.check_compatible(&input_schema, "nested flow")?;
        self.tail_schema = output_schema.clone();
        self.nodes.push(Node::Nested {
            id: String::new(),
            flow_ref: flow_ref.into(),
            input_schema,
            output_schema,
        });
        Ok(self)
    }

    /// Finalize the builder into an immutable [`Plan`]: assigns stable
    /// `node_id`s (path-from-root) and checks every task referenced has a
    /// unique `task_id` within the flow.
    pub fn compile(self) -> Result<Plan> {
        if self.nodes.is_empty() {
            return Err(CompileError::EmptyPlan.into());
        }
        let output_schema = self
            .nodes
            .last()
            .map(Node::output_schema)
            .unwrap_or_else(|| self.tail_schema.clone());
        let mut plan = Plan {
            nodes: self.nodes,
            input_schema: self.input_schema,
            output_schema,
        };
        assign_node_ids(&mut plan, "");

        let mut seen = HashSet::new();
        collect_task_ids(&plan, &mut seen)?;
        Ok(plan)
    }
}

fn assign_node_ids(plan: &mut Plan, prefix: &str) {
    for (index, node) in plan.nodes.iter_mut().enumerate() {
        let this_id = if prefix.is_empty() {
            index.to_string()
        } else {
            format!("{prefix}.{index}")
        };
        match node {
            Node::Step { id, .. } | Node::Nested { id, .. } => *id = this_id,
            Node::Branch { id, arms, .. } => {
                *id = this_id.clone();
                for (arm_index, arm) in arms.iter_mut().enumerate() {
                    assign_node_ids(&mut arm.plan, &format!("{this_id}.arm.{arm_index}"));
                }
            }
            Node::Parallel { id, arms } => {
                *id = this_id.clone();
                for (arm_index, arm) in arms.iter_mut().enumerate() {
                    assign_node_ids(arm, &format!("{this_id}.arm.{arm_index}"));
                }
            }
            Node::While { id, body, .. } => {
                *id = this_id.clone();
                assign_node_ids(body, &format!("{this_id}.body"));
            }
            Node::ForEach { id, body, .. } => {
                *id = this_id.clone();
                assign_node_ids(body, &format!("{this_id}.body"));
            }
        }
    }
}

fn collect_task_ids(plan: &Plan, seen: &mut HashSet<String>) -> Result<()> {
    for node in &plan.nodes {
        match node {
            Node::Step { task, .. } => {
                if !seen.insert(task.task_id().to_string()) {
                    return Err(CompileError::DuplicateTaskId(task.task_id().to_string()).into());
                }
            }
            Node::Branch { arms, .. } => {
                for arm in arms {
                    collect_task_ids(&arm.plan, seen)?;
                }
            }
            Node::Parallel { arms, .. } => {
                for arm in arms {
                    collect_task_ids(arm, seen)?;
                }
            }
            Node::While { body, .. } | Node::ForEach { body, .. } => {
                collect_task_ids(body, seen)?;
            }
            Node::Nested { .. } => {}
        }
    }
    Ok(())
}

/// Node ids the scheduler may resolve against without assuming a `NodeId`.
pub type NodeIdList = Vec<NodeId>;
