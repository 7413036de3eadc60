//! Parallel branch bookkeeping
//!
//! When a node takes two or more edges at once, each taken edge opens a branch that shares
//! one `parallel_id`. Nodes inherit the branch of the node that enqueued them; a join node
//! (two or more inbound edges) belongs to the enclosing branch instead. Every branch counts
//! its queued and running nodes, and reports success once the count drops to zero.

use crate::events::{GraphEngineEvent, NodeEventInfo, ParallelBranchInfo};
use crate::graph::Graph;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Branch {
    info: ParallelBranchInfo,
    parent: Option<String>,
    open: usize,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BranchTracker {
    branches: HashMap<String, Branch>,
    node_branches: HashMap<String, String>,
}

impl BranchTracker {
    /// Assign branches to the heads of the edges `source` just took
    pub(crate) fn on_edges_taken(
        &mut self,
        graph: &Graph,
        source: &str,
        heads: &[String],
    ) -> Vec<GraphEngineEvent> {
        let source_branch = self.node_branches.get(source).cloned();

        if heads.len() < 2 {
            for head in heads {
                if self.node_branches.contains_key(head) {
                    continue;
                }
                let branch = if graph.incoming_edges(head).len() >= 2 {
                    source_branch
                        .as_ref()
                        .and_then(|key| self.branches.get(key))
                        .and_then(|b| b.parent.clone())
                } else {
                    source_branch.clone()
                };
                if let Some(branch) = branch {
                    self.node_branches.insert(head.clone(), branch);
                }
            }
            return Vec::new();
        }

        let parallel_id = Uuid::new_v4().to_string();
        let parent_info = source_branch
            .as_ref()
            .and_then(|key| self.branches.get(key))
            .map(|b| b.info.clone());

        let mut events = Vec::with_capacity(heads.len());
        for head in heads {
            let info = ParallelBranchInfo {
                parallel_id: parallel_id.clone(),
                parallel_start_node_id: head.clone(),
                parent_parallel_id: parent_info.as_ref().map(|p| p.parallel_id.clone()),
                parent_parallel_start_node_id: parent_info
                    .as_ref()
                    .map(|p| p.parallel_start_node_id.clone()),
                in_iteration_id: None,
                in_loop_id: None,
            };
            let key = format!("{}:{}", parallel_id, head);
            self.branches.insert(
                key.clone(),
                Branch {
                    info: info.clone(),
                    parent: source_branch.clone(),
                    open: 0,
                    closed: false,
                },
            );
            self.node_branches.insert(head.clone(), key);
            events.push(GraphEngineEvent::ParallelBranchRunStarted { branch: info });
        }
        events
    }

    /// Copy the node's branch placement onto its event info
    pub(crate) fn annotate(&self, node_id: &str, info: &mut NodeEventInfo) {
        let Some(branch) = self
            .node_branches
            .get(node_id)
            .and_then(|key| self.branches.get(key))
        else {
            return;
        };
        info.parallel_id = Some(branch.info.parallel_id.clone());
        info.parallel_start_node_id = Some(branch.info.parallel_start_node_id.clone());
        info.parent_parallel_id = branch.info.parent_parallel_id.clone();
        info.parent_parallel_start_node_id = branch.info.parent_parallel_start_node_id.clone();
    }

    fn chain(&self, node_id: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut current = self.node_branches.get(node_id).cloned();
        while let Some(key) = current {
            current = self.branches.get(&key).and_then(|b| b.parent.clone());
            keys.push(key);
        }
        keys
    }

    pub(crate) fn on_enqueue(&mut self, node_id: &str) {
        for key in self.chain(node_id) {
            if let Some(branch) = self.branches.get_mut(&key) {
                branch.open += 1;
            }
        }
    }

    pub(crate) fn on_complete(&mut self, node_id: &str) -> Vec<GraphEngineEvent> {
        let mut events = Vec::new();
        for key in self.chain(node_id) {
            let Some(branch) = self.branches.get_mut(&key) else {
                continue;
            };
            branch.open = branch.open.saturating_sub(1);
            if branch.open == 0 && !branch.closed {
                branch.closed = true;
                events.push(GraphEngineEvent::ParallelBranchRunSucceeded {
                    branch: branch.info.clone(),
                });
            }
        }
        events
    }

    pub(crate) fn on_failure(&mut self, node_id: &str, error: &str) -> Vec<GraphEngineEvent> {
        let mut events = Vec::new();
        for key in self.chain(node_id) {
            let Some(branch) = self.branches.get_mut(&key) else {
                continue;
            };
            if !branch.closed {
                branch.closed = true;
                events.push(GraphEngineEvent::ParallelBranchRunFailed {
                    branch: branch.info.clone(),
                    error: error.to_string(),
                });
            }
        }
        events
    }
}
