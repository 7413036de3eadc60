//! Engine events
//!
//! Every observable step of a run is a [`GraphEngineEvent`]. The set is closed: consumers
//! match it exhaustively.
//!
//! ```text
//! GraphRunStarted
//!   ├─ NodeRunStarted ─┬─ NodeRunStreamChunk*
//!   │                  ├─ NodeRunRetry* (same execution id, no second Started)
//!   │                  └─ NodeRunSucceeded | NodeRunFailed | NodeRunException | NodeRunPaused
//!   ├─ IterationStarted ─ IterationNext* ─ IterationSucceeded | IterationFailed
//!   ├─ LoopStarted ─ LoopNext* ─ LoopSucceeded | LoopFailed
//!   ├─ ParallelBranchRunStarted ─ ParallelBranchRunSucceeded | ParallelBranchRunFailed
//!   └─ Ping*
//! GraphRunSucceeded | GraphRunPartialSucceeded | GraphRunFailed | GraphRunAborted | GraphRunPaused
//! ```
//!
//! Events raised inside an iteration or loop body carry `in_iteration_id` / `in_loop_id` on
//! their [`NodeEventInfo`] and are forwarded unchanged by the enclosing engine.

use crate::node::NodeRunResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity and placement of one node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEventInfo {
    /// Node execution id, stable across retries
    pub id: String,

    pub node_id: String,

    pub node_type: String,

    #[serde(default)]
    pub node_title: String,

    pub start_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_start_node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_start_node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_iteration_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_loop_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_index: Option<usize>,

    /// Set on events from one item of a parallel iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_mode_run_id: Option<String>,
}

impl NodeEventInfo {
    /// Info for a fresh execution of `node_id`
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        node_title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            node_title: node_title.into(),
            start_at: Utc::now(),
            predecessor_node_id: None,
            parallel_id: None,
            parallel_start_node_id: None,
            parent_parallel_id: None,
            parent_parallel_start_node_id: None,
            in_iteration_id: None,
            iteration_index: None,
            in_loop_id: None,
            loop_index: None,
            parallel_mode_run_id: None,
        }
    }

    /// Whether the event was raised inside an iteration or loop body
    pub fn is_nested(&self) -> bool {
        self.in_iteration_id.is_some() || self.in_loop_id.is_some()
    }
}

/// Placement of a parallel branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBranchInfo {
    pub parallel_id: String,

    pub parallel_start_node_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_start_node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_iteration_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_loop_id: Option<String>,
}

/// Everything a running engine reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    GraphRunStarted,

    GraphRunSucceeded {
        outputs: Map<String, Value>,
    },

    GraphRunPartialSucceeded {
        exceptions_count: u64,
        outputs: Map<String, Value>,
    },

    GraphRunFailed {
        error: String,
        exceptions_count: u64,
    },

    GraphRunAborted {
        reason: Option<String>,
        outputs: Map<String, Value>,
    },

    GraphRunPaused {
        paused_nodes: Vec<String>,
        outputs: Map<String, Value>,
    },

    NodeRunStarted {
        info: NodeEventInfo,
    },

    NodeRunStreamChunk {
        info: NodeEventInfo,
        selector: Vec<String>,
        chunk: String,
        is_final: bool,
    },

    NodeRunSucceeded {
        info: NodeEventInfo,
        result: NodeRunResult,
    },

    NodeRunFailed {
        info: NodeEventInfo,
        error: String,
        result: NodeRunResult,
    },

    /// Failure absorbed by the node's error strategy
    NodeRunException {
        info: NodeEventInfo,
        error: String,
        result: NodeRunResult,
    },

    NodeRunRetry {
        info: NodeEventInfo,
        error: String,
        retry_index: u32,
        result: NodeRunResult,
    },

    NodeRunPaused {
        info: NodeEventInfo,
        result: NodeRunResult,
    },

    IterationStarted {
        info: NodeEventInfo,
        inputs: Map<String, Value>,
        metadata: Map<String, Value>,
    },

    IterationNext {
        info: NodeEventInfo,
        index: usize,
        pre_iteration_output: Option<Value>,
    },

    IterationSucceeded {
        info: NodeEventInfo,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
        metadata: Map<String, Value>,
        steps: usize,
    },

    IterationFailed {
        info: NodeEventInfo,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
        metadata: Map<String, Value>,
        steps: usize,
        error: String,
    },

    LoopStarted {
        info: NodeEventInfo,
        inputs: Map<String, Value>,
        metadata: Map<String, Value>,
    },

    LoopNext {
        info: NodeEventInfo,
        index: usize,
        pre_loop_output: Option<Value>,
    },

    LoopSucceeded {
        info: NodeEventInfo,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
        metadata: Map<String, Value>,
        steps: usize,
    },

    LoopFailed {
        info: NodeEventInfo,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
        metadata: Map<String, Value>,
        steps: usize,
        error: String,
    },

    ParallelBranchRunStarted {
        branch: ParallelBranchInfo,
    },

    ParallelBranchRunSucceeded {
        branch: ParallelBranchInfo,
    },

    ParallelBranchRunFailed {
        branch: ParallelBranchInfo,
        error: String,
    },

    Ping,
}

impl GraphEngineEvent {
    /// Node placement carried by node, iteration and loop events
    pub fn node_info(&self) -> Option<&NodeEventInfo> {
        match self {
            Self::NodeRunStarted { info }
            | Self::NodeRunStreamChunk { info, .. }
            | Self::NodeRunSucceeded { info, .. }
            | Self::NodeRunFailed { info, .. }
            | Self::NodeRunException { info, .. }
            | Self::NodeRunRetry { info, .. }
            | Self::NodeRunPaused { info, .. }
            | Self::IterationStarted { info, .. }
            | Self::IterationNext { info, .. }
            | Self::IterationSucceeded { info, .. }
            | Self::IterationFailed { info, .. }
            | Self::LoopStarted { info, .. }
            | Self::LoopNext { info, .. }
            | Self::LoopSucceeded { info, .. }
            | Self::LoopFailed { info, .. } => Some(info),
            Self::GraphRunStarted
            | Self::GraphRunSucceeded { .. }
            | Self::GraphRunPartialSucceeded { .. }
            | Self::GraphRunFailed { .. }
            | Self::GraphRunAborted { .. }
            | Self::GraphRunPaused { .. }
            | Self::ParallelBranchRunStarted { .. }
            | Self::ParallelBranchRunSucceeded { .. }
            | Self::ParallelBranchRunFailed { .. }
            | Self::Ping => None,
        }
    }

    pub fn node_info_mut(&mut self) -> Option<&mut NodeEventInfo> {
        match self {
            Self::NodeRunStarted { info }
            | Self::NodeRunStreamChunk { info, .. }
            | Self::NodeRunSucceeded { info, .. }
            | Self::NodeRunFailed { info, .. }
            | Self::NodeRunException { info, .. }
            | Self::NodeRunRetry { info, .. }
            | Self::NodeRunPaused { info, .. }
            | Self::IterationStarted { info, .. }
            | Self::IterationNext { info, .. }
            | Self::IterationSucceeded { info, .. }
            | Self::IterationFailed { info, .. }
            | Self::LoopStarted { info, .. }
            | Self::LoopNext { info, .. }
            | Self::LoopSucceeded { info, .. }
            | Self::LoopFailed { info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn branch_info_mut(&mut self) -> Option<&mut ParallelBranchInfo> {
        match self {
            Self::ParallelBranchRunStarted { branch }
            | Self::ParallelBranchRunSucceeded { branch }
            | Self::ParallelBranchRunFailed { branch, .. } => Some(branch),
            _ => None,
        }
    }

    /// Whether this is one of the run-ending events
    pub fn is_graph_terminal(&self) -> bool {
        matches!(
            self,
            Self::GraphRunSucceeded { .. }
                | Self::GraphRunPartialSucceeded { .. }
                | Self::GraphRunFailed { .. }
                | Self::GraphRunAborted { .. }
                | Self::GraphRunPaused { .. }
        )
    }

    /// Wire name of the variant, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::GraphRunStarted => "graph_run_started",
            Self::GraphRunSucceeded { .. } => "graph_run_succeeded",
            Self::GraphRunPartialSucceeded { .. } => "graph_run_partial_succeeded",
            Self::GraphRunFailed { .. } => "graph_run_failed",
            Self::GraphRunAborted { .. } => "graph_run_aborted",
            Self::GraphRunPaused { .. } => "graph_run_paused",
            Self::NodeRunStarted { .. } => "node_run_started",
            Self::NodeRunStreamChunk { .. } => "node_run_stream_chunk",
            Self::NodeRunSucceeded { .. } => "node_run_succeeded",
            Self::NodeRunFailed { .. } => "node_run_failed",
            Self::NodeRunException { .. } => "node_run_exception",
            Self::NodeRunRetry { .. } => "node_run_retry",
            Self::NodeRunPaused { .. } => "node_run_paused",
            Self::IterationStarted { .. } => "iteration_started",
            Self::IterationNext { .. } => "iteration_next",
            Self::IterationSucceeded { .. } => "iteration_succeeded",
            Self::IterationFailed { .. } => "iteration_failed",
            Self::LoopStarted { .. } => "loop_started",
            Self::LoopNext { .. } => "loop_next",
            Self::LoopSucceeded { .. } => "loop_succeeded",
            Self::LoopFailed { .. } => "loop_failed",
            Self::ParallelBranchRunStarted { .. } => "parallel_branch_run_started",
            Self::ParallelBranchRunSucceeded { .. } => "parallel_branch_run_succeeded",
            Self::ParallelBranchRunFailed { .. } => "parallel_branch_run_failed",
            Self::Ping => "ping",
        }
    }
}
