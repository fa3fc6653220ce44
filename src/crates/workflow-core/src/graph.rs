//! Graph Model (C3) — the immutable, compiled workflow plan
//!
//! A [`Plan`] is produced once, by the [`crate::builder::FlowBuilder`], and
//! never mutated again. It is an ordered sequence of [`Node`]s with the
//! invariant that node *i*'s output type is assignment-compatible with
//! node *i+1*'s input type. Node/edge graphs with back-edges do not exist
//! here: loops are single `While`/`ForEach` nodes, not cycles in the node
//! graph, so the plan is acyclic by construction.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::schema::Schema;
use crate::task::TaskRef;

pub type NodeId = String;

/// A pure predicate over the current value. Never serialized — persisted
/// executions reference predicates by compiled node position, never by
/// closure identity.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// One arm of a [`Node::Branch`]: `(predicate, sub-plan)`. Arms are tried
/// in declared order; the first matching predicate's sub-plan executes.
pub struct BranchArm {
    pub predicate: Predicate,
    pub plan: Plan,
}

impl fmt::Debug for BranchArm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchArm").field("plan", &self.plan).finish()
    }
}

/// A position in a workflow plan.
#[derive(Debug)]
pub enum Node {
    /// Executes one task.
    Step { id: NodeId, task: TaskRef },

    /// Ordered list of `(predicate, sub-plan)`; first match wins. Output
    /// type is the compiler-computed unification of the arms' outputs.
    Branch {
        id: NodeId,
        arms: Vec<BranchArm>,
        output_schema: Schema,
    },

    /// Runs every arm with the same input, joins on completion. Output is
    /// the ordered list of arm outputs (declared order, not completion
    /// order).
    Parallel { id: NodeId, arms: Vec<Plan> },

    /// Re-executes `body` so long as `predicate(current_value)` holds.
    /// `body`'s output type equals its input type (loop invariant).
    While {
        id: NodeId,
        predicate: Predicate,
        body: Box<Plan>,
    },

    /// Requires the current value to be a sequence; executes `body` once
    /// per element, up to `concurrency` at a time (default 1).
    ForEach {
        id: NodeId,
        body: Box<Plan>,
        concurrency: usize,
    },

    /// A child plan treated as an opaque node; executed as a sub-execution
    /// with its own `execution_id` linked by parent pointer.
    Nested {
        id: NodeId,
        flow_ref: String,
        input_schema: Schema,
        output_schema: Schema,
    },
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Step { id, .. }
            | Node::Branch { id, .. }
            | Node::Parallel { id, .. }
            | Node::While { id, .. }
            | Node::ForEach { id, .. }
            | Node::Nested { id, .. } => id,
        }
    }

    pub fn input_schema(&self) -> Schema {
        match self {
            Node::Step { task, .. } => task.input_schema().clone(),
            Node::Branch { arms, .. } => arms[0].plan.input_schema.clone(),
            Node::Parallel { arms, .. } => arms[0].input_schema.clone(),
            Node::While { body, .. } => body.input_schema.clone(),
            Node::ForEach { body, .. } => body.input_schema.clone(),
            Node::Nested { input_schema, .. } => input_schema.clone(),
        }
    }

    pub fn output_schema(&self) -> Schema {
        match self {
            Node::Step { task, .. } => task.output_schema().clone(),
            Node::Branch { output_schema, .. } => output_schema.clone(),
            Node::Parallel { .. } => Schema::new(serde_json::json!({ "type": "array" })),
            Node::While { body, .. } => body.output_schema.clone(),
            Node::ForEach { .. } => Schema::new(serde_json::json!({ "type": "array" })),
            Node::Nested { output_schema, .. } => output_schema.clone(),
        }
    }

    /// Node ids of every arm-root sub-plan, for nodes that have arms.
    /// Empty for `Step` and `Nested`.
    pub fn arm_roots(&self) -> Vec<&NodeId> {
        match self {
            Node::Branch { arms, .. } => arms
                .iter()
                .filter_map(|a| a.plan.nodes.first().map(Node::id))
                .collect(),
            Node::Parallel { arms, .. } => {
                arms.iter().filter_map(|p| p.nodes.first().map(Node::id)).collect()
            }
            Node::While { body, .. } | Node::ForEach { body, .. } => {
                body.nodes.first().map(Node::id).into_iter().collect()
            }
            Node::Step { .. } | Node::Nested { .. } => Vec::new(),
        }
    }
}

/// An ordered sequence of [`Node`]s, immutable once compiled.
#[derive(Debug)]
pub struct Plan {
    pub nodes: Vec<Node>,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

impl Plan {
    /// The node ids the scheduler may begin from — just the first node's
    /// id, since a `Plan` is a linear chain (concurrency lives inside
    /// `Parallel`/`ForEach` arms, not between top-level nodes).
    pub fn root_nodes(&self) -> Vec<&NodeId> {
        self.nodes.first().map(Node::id).into_iter().collect()
    }

    /// Depth-first search through this plan and every nested sub-plan.
    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        for node in &self.nodes {
            if node.id() == id {
                return Some(node);
            }
            if let Some(found) = Self::search_nested(node, id) {
                return Some(found);
            }
        }
        None
    }

    fn search_nested<'a>(node: &'a Node, id: &str) -> Option<&'a Node> {
        match node {
            Node::Branch { arms, .. } => arms.iter().find_map(|a| a.plan.node_by_id(id)),
            Node::Parallel { arms, .. } => arms.iter().find_map(|p| p.node_by_id(id)),
            Node::While { body, .. } | Node::ForEach { body, .. } => body.node_by_id(id),
            Node::Step { .. } | Node::Nested { .. } => None,
        }
    }

    /// The next top-level sibling after `node_id` within whichever plan
    /// (root or nested) contains it, or `None` if it was the last node of
    /// that plan.
    pub fn successor_of(&self, node_id: &str) -> Option<&NodeId> {
        Self::successor_in(self, node_id)
    }

    fn successor_in<'a>(plan: &'a Plan, node_id: &str) -> Option<&'a NodeId> {
        if let Some(pos) = plan.nodes.iter().position(|n| n.id() == node_id) {
            return plan.nodes.get(pos + 1).map(Node::id);
        }
        plan.nodes.iter().find_map(|n| match n {
            Node::Branch { arms, .. } => arms.iter().find_map(|a| Self::successor_in(&a.plan, node_id)),
            Node::Parallel { arms, .. } => arms.iter().find_map(|p| Self::successor_in(p, node_id)),
            Node::While { body, .. } | Node::ForEach { body, .. } => Self::successor_in(body, node_id),
            Node::Step { .. } | Node::Nested { .. } => None,
        })
    }

    pub fn arms_of(&self, node_id: &str) -> Vec<&NodeId> {
        self.node_by_id(node_id).map(Node::arm_roots).unwrap_or_default()
    }

    pub fn input_type_at(&self, node_id: &str) -> Option<Schema> {
        self.node_by_id(node_id).map(Node::input_schema)
    }

    pub fn output_type_at(&self, node_id: &str) -> Option<Schema> {
        self.node_by_id(node_id).map(Node::output_schema)
    }
}
