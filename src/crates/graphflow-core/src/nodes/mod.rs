//! Built-in node types

mod builtin;
pub mod condition;
pub mod iteration;
pub mod loop_node;
mod subgraph;

pub use builtin::{AnswerNode, BodyStartNode, EndNode, IfElseNode, StartNode, ELSE_HANDLE};
pub use condition::{evaluate_conditions, ComparisonOperator, Condition, LogicalOperator};
pub use iteration::{ErrorHandleMode, IterationNode, IterationNodeData};
pub use loop_node::{LoopNode, LoopNodeData, LoopValueType, LoopVariable};

use crate::node::NodeRegistry;

/// Register every built-in node type on `registry`
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry
        .register("start", StartNode::from_config)
        .register("end", EndNode::from_config)
        .register("answer", AnswerNode::from_config)
        .register("if-else", IfElseNode::from_config)
        .register("iteration", IterationNode::from_config)
        .register("iteration-start", BodyStartNode::from_config)
        .register("loop", LoopNode::from_config)
        .register("loop-start", BodyStartNode::from_config);
}
