//! Execution-progress aggregate
//!
//! Holds the run-level flags (started, completed, aborted, paused, failed), the exception
//! counter, per-node retry counts and the `unknown / taken / skipped` state of every node and
//! edge. Edge states live here so that a resumed engine continues where the previous one
//! stopped.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const GRAPH_EXECUTION_TYPE: &str = "GraphExecution";
const GRAPH_EXECUTION_VERSION: &str = "1.0";

/// Resolution state of a node or an edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Unknown,
    Taken,
    Skipped,
}

/// Progress aggregate of one workflow run
pub trait GraphExecution: Send {
    fn workflow_id(&self) -> &str;

    fn set_workflow_id(&mut self, workflow_id: &str);

    fn started(&self) -> bool;

    fn start(&mut self);

    fn completed(&self) -> bool;

    fn complete(&mut self);

    fn aborted(&self) -> bool;

    fn abort_reason(&self) -> Option<&str>;

    fn abort(&mut self, reason: &str);

    fn paused(&self) -> bool;

    fn pause(&mut self);

    /// Clear the paused flag when a new engine picks the run up again
    fn resume(&mut self);

    fn error(&self) -> Option<&str>;

    /// Record a run failure; the first error is kept
    fn fail(&mut self, error: &str);

    fn has_error(&self) -> bool {
        self.error().is_some()
    }

    fn exceptions_count(&self) -> u64;

    fn record_exception(&mut self);

    fn node_state(&self, node_id: &str) -> NodeState;

    fn set_node_state(&mut self, node_id: &str, state: NodeState);

    fn edge_state(&self, edge_id: &str) -> NodeState;

    fn set_edge_state(&mut self, edge_id: &str, state: NodeState);

    fn retry_count(&self, node_id: &str) -> u32;

    /// Bump and return the retry count of a node
    fn increment_retry(&mut self, node_id: &str) -> u32;

    fn dumps(&self) -> Result<String>;

    fn loads(&mut self, data: &str) -> Result<()>;
}

/// In-memory [`GraphExecution`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultGraphExecution {
    #[serde(default)]
    workflow_id: String,

    #[serde(default)]
    started: bool,

    #[serde(default)]
    completed: bool,

    #[serde(default)]
    aborted: bool,

    #[serde(default)]
    abort_reason: Option<String>,

    #[serde(default)]
    paused: bool,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    exceptions_count: u64,

    #[serde(default)]
    node_states: HashMap<String, NodeState>,

    #[serde(default)]
    edge_states: HashMap<String, NodeState>,

    #[serde(default)]
    retry_counts: HashMap<String, u32>,
}

impl DefaultGraphExecution {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ..Self::default()
        }
    }

    /// Workflow id recorded in a serialized aggregate, if the payload carries one
    pub fn workflow_id_from_payload(data: &str) -> Option<String> {
        let value: Value = serde_json::from_str(data).ok()?;
        value
            .get("workflow_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl GraphExecution for DefaultGraphExecution {
    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn set_workflow_id(&mut self, workflow_id: &str) {
        self.workflow_id = workflow_id.to_string();
    }

    fn started(&self) -> bool {
        self.started
    }

    fn start(&mut self) {
        self.started = true;
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn complete(&mut self) {
        self.completed = true;
    }

    fn aborted(&self) -> bool {
        self.aborted
    }

    fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    fn abort(&mut self, reason: &str) {
        self.aborted = true;
        self.abort_reason = Some(reason.to_string());
    }

    fn paused(&self) -> bool {
        self.paused
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
        self.completed = false;
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn fail(&mut self, error: &str) {
        if self.error.is_none() {
            self.error = Some(error.to_string());
        }
    }

    fn exceptions_count(&self) -> u64 {
        self.exceptions_count
    }

    fn record_exception(&mut self) {
        self.exceptions_count += 1;
    }

    fn node_state(&self, node_id: &str) -> NodeState {
        self.node_states.get(node_id).copied().unwrap_or_default()
    }

    fn set_node_state(&mut self, node_id: &str, state: NodeState) {
        self.node_states.insert(node_id.to_string(), state);
    }

    fn edge_state(&self, edge_id: &str) -> NodeState {
        self.edge_states.get(edge_id).copied().unwrap_or_default()
    }

    fn set_edge_state(&mut self, edge_id: &str, state: NodeState) {
        self.edge_states.insert(edge_id.to_string(), state);
    }

    fn retry_count(&self, node_id: &str) -> u32 {
        self.retry_counts.get(node_id).copied().unwrap_or(0)
    }

    fn increment_retry(&mut self, node_id: &str) -> u32 {
        let count = self.retry_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn dumps(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("type".into(), Value::from(GRAPH_EXECUTION_TYPE));
            map.insert("version".into(), Value::from(GRAPH_EXECUTION_VERSION));
        }
        Ok(serde_json::to_string(&value)?)
    }

    fn loads(&mut self, data: &str) -> Result<()> {
        let value: Value = serde_json::from_str(data)?;
        match value.get("type").and_then(Value::as_str) {
            Some(GRAPH_EXECUTION_TYPE) => {}
            other => {
                return Err(GraphError::State(format!(
                    "Invalid graph execution payload type: {}",
                    other.unwrap_or("<missing>")
                )))
            }
        }
        match value.get("version").and_then(Value::as_str) {
            Some(GRAPH_EXECUTION_VERSION) => {}
            other => {
                return Err(GraphError::UnsupportedSnapshotVersion(
                    other.unwrap_or("<missing>").to_string(),
                ))
            }
        }
        *self = serde_json::from_value(value)?;
        Ok(())
    }
}
