//! Edge selection and skip propagation
//!
//! ```text
//! node succeeded ─► select edges by handle ─► Taken / Skipped
//!                                   │
//!                     for each head: any inbound Unknown? ─► wait
//!                                    any inbound Taken?   ─► ready
//!                                    all inbound Skipped  ─► skip, propagate downstream
//! ```

use crate::error::{GraphError, Result};
use crate::graph::{ErrorStrategy, Graph};
use crate::node::{NodeExecutionType, SOURCE_HANDLE};
use crate::runtime::{GraphExecution, NodeState};

/// What one node completion did to the graph
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct EdgeOutcome {
    pub taken_edges: Vec<String>,
    pub taken_heads: Vec<String>,
    pub ready_nodes: Vec<String>,
    pub skipped_nodes: Vec<String>,
}

/// Mark the outgoing edges of a finished node and find the nodes that became ready
///
/// Branch nodes and nodes with a `fail-branch` strategy only take edges whose handle matches
/// `handle`; every other node takes all of its edges.
pub(crate) fn process_node_success(
    graph: &Graph,
    execution: &mut dyn GraphExecution,
    node_id: &str,
    handle: Option<&str>,
) -> Result<EdgeOutcome> {
    let node = graph
        .node(node_id)
        .ok_or_else(|| GraphError::State(format!("Node '{}' is not in the graph", node_id)))?;

    let by_handle = node.execution_type == NodeExecutionType::Branch
        || node.data.error_strategy == Some(ErrorStrategy::FailBranch);
    let selected = match (by_handle, handle) {
        (false, _) => None,
        (true, Some(handle)) => Some(handle),
        (true, None) if node.execution_type == NodeExecutionType::Branch => {
            return Err(GraphError::Execution(format!(
                "Branch node {} did not select any edge",
                node_id
            )));
        }
        (true, None) => Some(SOURCE_HANDLE),
    };

    let mut outcome = EdgeOutcome::default();
    let mut heads = Vec::new();
    for edge in graph.outgoing_edges(node_id) {
        let take = selected.map_or(true, |handle| edge.source_handle == handle);
        if take {
            execution.set_edge_state(&edge.id, NodeState::Taken);
            outcome.taken_edges.push(edge.id.clone());
            outcome.taken_heads.push(edge.head.clone());
        } else {
            execution.set_edge_state(&edge.id, NodeState::Skipped);
        }
        heads.push(edge.head.clone());
    }

    for head in heads {
        evaluate(graph, execution, &head, &mut outcome);
    }
    Ok(outcome)
}

fn evaluate(graph: &Graph, execution: &mut dyn GraphExecution, node_id: &str, outcome: &mut EdgeOutcome) {
    if execution.node_state(node_id) != NodeState::Unknown {
        return;
    }

    let states: Vec<NodeState> = graph
        .incoming_edges(node_id)
        .iter()
        .map(|edge| execution.edge_state(&edge.id))
        .collect();
    if states.contains(&NodeState::Unknown) {
        return;
    }

    if states.contains(&NodeState::Taken) {
        execution.set_node_state(node_id, NodeState::Taken);
        outcome.ready_nodes.push(node_id.to_string());
        return;
    }

    execution.set_node_state(node_id, NodeState::Skipped);
    outcome.skipped_nodes.push(node_id.to_string());
    let heads: Vec<String> = graph
        .outgoing_edges(node_id)
        .into_iter()
        .map(|edge| {
            execution.set_edge_state(&edge.id, NodeState::Skipped);
            edge.head.clone()
        })
        .collect();
    for head in heads {
        evaluate(graph, execution, &head, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphConfig;
    use crate::node::NodeRegistry;
    use crate::runtime::DefaultGraphExecution;
    use serde_json::json;

    fn graph(value: serde_json::Value) -> Graph {
        let config: GraphConfig = serde_json::from_value(value).unwrap();
        Graph::init(&config, &NodeRegistry::with_builtins(), None).unwrap()
    }

    fn if_else_graph() -> Graph {
        graph(json!({
            "nodes": [
                {"id": "start", "data": {"type": "start", "title": "Start"}},
                {"id": "check", "data": {"type": "if-else", "title": "Check", "cases": [
                    {"case_id": "true", "logical_operator": "and", "conditions": [
                        {"variable_selector": ["start", "x"], "comparison_operator": "is", "value": "y"}
                    ]}
                ]}},
                {"id": "yes", "data": {"type": "answer", "title": "Yes", "answer": "yes"}},
                {"id": "no", "data": {"type": "answer", "title": "No", "answer": "no"}},
                {"id": "after_no", "data": {"type": "answer", "title": "After", "answer": "after"}}
            ],
            "edges": [
                {"source": "start", "target": "check"},
                {"source": "check", "target": "yes", "sourceHandle": "true"},
                {"source": "check", "target": "no", "sourceHandle": "false"},
                {"source": "no", "target": "after_no"}
            ]
        }))
    }

    #[test]
    fn test_branch_selects_handle_and_skips_the_rest() {
        let graph = if_else_graph();
        let mut execution = DefaultGraphExecution::new("wf");
        process_node_success(&graph, &mut execution, "start", None).unwrap();

        let outcome = process_node_success(&graph, &mut execution, "check", Some("true")).unwrap();
        assert_eq!(outcome.ready_nodes, vec!["yes".to_string()]);
        assert_eq!(outcome.skipped_nodes, vec!["no".to_string(), "after_no".to_string()]);
        assert_eq!(execution.node_state("after_no"), NodeState::Skipped);
    }

    #[test]
    fn test_branch_without_handle_fails() {
        let graph = if_else_graph();
        let mut execution = DefaultGraphExecution::new("wf");
        let err = process_node_success(&graph, &mut execution, "check", None).unwrap_err();
        assert!(err.to_string().contains("did not select any edge"));
    }

    #[test]
    fn test_join_waits_for_every_inbound_edge() {
        let graph = graph(json!({
            "nodes": [
                {"id": "start", "data": {"type": "start", "title": "Start"}},
                {"id": "a", "data": {"type": "answer", "title": "A", "answer": "a"}},
                {"id": "b", "data": {"type": "answer", "title": "B", "answer": "b"}},
                {"id": "join", "data": {"type": "answer", "title": "Join", "answer": "j"}}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "start", "target": "b"},
                {"source": "a", "target": "join"},
                {"source": "b", "target": "join"}
            ]
        }));
        let mut execution = DefaultGraphExecution::new("wf");
        let outcome = process_node_success(&graph, &mut execution, "start", None).unwrap();
        assert_eq!(outcome.ready_nodes, vec!["a".to_string(), "b".to_string()]);

        let outcome = process_node_success(&graph, &mut execution, "a", None).unwrap();
        assert!(outcome.ready_nodes.is_empty());
        let outcome = process_node_success(&graph, &mut execution, "b", None).unwrap();
        assert_eq!(outcome.ready_nodes, vec!["join".to_string()]);
    }
}
