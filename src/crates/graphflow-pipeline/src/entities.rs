//! Durable records of a workflow run
//!
//! A [`WorkflowRun`] is created when the engine reports `GraphRunStarted` and is updated once
//! more when the run ends. Every node execution gets a [`NodeExecution`]; retries get a record
//! of their own with status [`NodeExecutionStatus::Retry`].

use chrono::{DateTime, Utc};
use graphflow_core::{InvokeFrom, NodeEventInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowRunStatus {
    Running,
    Succeeded,
    PartialSucceeded,
    Failed,
    Stopped,
    Paused,
}

impl WorkflowRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartialSucceeded => "partial-succeeded",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
        }
    }

    /// Statuses that close a run for good
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::PartialSucceeded | Self::Failed | Self::Stopped
        )
    }
}

impl fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowRunTriggeredFrom {
    Debugging,
    AppRun,
}

impl From<InvokeFrom> for WorkflowRunTriggeredFrom {
    fn from(invoke_from: InvokeFrom) -> Self {
        match invoke_from {
            InvokeFrom::Debugger => Self::Debugging,
            InvokeFrom::ServiceApi | InvokeFrom::WebApp | InvokeFrom::Explore => Self::AppRun,
        }
    }
}

/// One execution of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,

    pub tenant_id: String,

    pub app_id: String,

    pub workflow_id: String,

    /// Position of the run among the runs of its app, starting at 1
    pub sequence_number: u64,

    pub triggered_from: WorkflowRunTriggeredFrom,

    /// User inputs plus `sys.*` values
    pub inputs: Map<String, Value>,

    pub status: WorkflowRunStatus,

    #[serde(default)]
    pub outputs: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Seconds
    #[serde(default)]
    pub elapsed_time: f64,

    #[serde(default)]
    pub total_tokens: u64,

    #[serde(default)]
    pub total_steps: u64,

    #[serde(default)]
    pub exceptions_count: u64,

    pub created_by: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Exception,
    Retry,
    Paused,
}

impl NodeExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Exception => "exception",
            Self::Retry => "retry",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for NodeExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement and usage stored alongside a node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_mode_run_id: Option<String>,

    #[serde(default)]
    pub total_tokens: u64,

    /// Node-reported metadata that has no field of its own
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionMetadata {
    pub fn from_info(info: &NodeEventInfo) -> Self {
        Self {
            iteration_id: info.in_iteration_id.clone(),
            iteration_index: info.iteration_index,
            loop_id: info.in_loop_id.clone(),
            loop_index: info.loop_index,
            parallel_mode_run_id: info.parallel_mode_run_id.clone(),
            total_tokens: 0,
            extra: Map::new(),
        }
    }

    /// Fold a node result's metadata in, keeping placement fields from the event
    pub fn merge_reported(&mut self, reported: &Map<String, Value>, total_tokens: u64) {
        self.total_tokens = reported
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(total_tokens);
        for (key, value) in reported {
            if key != "total_tokens" {
                self.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

/// One execution of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Record id; a retry record gets its own
    pub id: String,

    /// Execution id reported by the engine, shared by retries of the same execution
    pub node_execution_id: String,

    pub workflow_run_id: String,

    /// Start order within the run, starting at 1
    pub index: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_node_id: Option<String>,

    pub node_id: String,

    pub node_type: String,

    pub title: String,

    #[serde(default)]
    pub inputs: Map<String, Value>,

    #[serde(default)]
    pub process_data: Map<String, Value>,

    #[serde(default)]
    pub outputs: Map<String, Value>,

    pub status: NodeExecutionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub elapsed_time: f64,

    #[serde(default)]
    pub execution_metadata: ExecutionMetadata,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// A running record for the execution described by `info`
    pub fn running(workflow_run_id: &str, index: u64, info: &NodeEventInfo) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_execution_id: info.id.clone(),
            workflow_run_id: workflow_run_id.to_string(),
            index,
            predecessor_node_id: info.predecessor_node_id.clone(),
            node_id: info.node_id.clone(),
            node_type: info.node_type.clone(),
            title: info.node_title.clone(),
            inputs: Map::new(),
            process_data: Map::new(),
            outputs: Map::new(),
            status: NodeExecutionStatus::Running,
            error: None,
            elapsed_time: 0.0,
            execution_metadata: ExecutionMetadata::from_info(info),
            created_at: info.start_at,
            finished_at: None,
        }
    }

    /// Close the record at `finished_at`
    pub fn finish(&mut self, status: NodeExecutionStatus, finished_at: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(finished_at);
        self.elapsed_time = seconds_between(self.created_at, finished_at);
    }

    /// Iteration and loop nodes report through their own responses
    pub fn is_container(&self) -> bool {
        is_container_type(&self.node_type)
    }
}

pub(crate) fn is_container_type(node_type: &str) -> bool {
    matches!(node_type, "iteration" | "loop")
}

pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().unwrap_or(0).max(0) as f64 / 1_000_000.0
}

/// Log entry written once per finished, externally triggered run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAppLog {
    pub id: String,

    pub tenant_id: String,

    pub app_id: String,

    pub workflow_id: String,

    pub workflow_run_id: String,

    pub created_from: InvokeFrom,

    pub created_by: String,

    pub created_at: DateTime<Utc>,
}

/// Address of the draft variables written for one node execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftVariableKey {
    pub app_id: String,

    pub node_id: String,

    pub node_type: String,

    pub node_execution_id: String,

    /// Iteration or loop the node ran inside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_node_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(WorkflowRunStatus::PartialSucceeded).unwrap(),
            json!("partial-succeeded")
        );
        assert_eq!(NodeExecutionStatus::Retry.to_string(), "retry");
        assert!(WorkflowRunStatus::Stopped.is_finished());
        assert!(!WorkflowRunStatus::Paused.is_finished());
    }

    #[test]
    fn test_triggered_from_origin() {
        assert_eq!(
            WorkflowRunTriggeredFrom::from(InvokeFrom::Debugger),
            WorkflowRunTriggeredFrom::Debugging
        );
        assert_eq!(
            WorkflowRunTriggeredFrom::from(InvokeFrom::WebApp),
            WorkflowRunTriggeredFrom::AppRun
        );
    }

    #[test]
    fn test_running_record_copies_placement() {
        let mut info = NodeEventInfo::new("dbl", "double", "Double");
        info.in_iteration_id = Some("it".into());
        info.iteration_index = Some(2);
        info.predecessor_node_id = Some("it_start".into());

        let mut record = NodeExecution::running("run-1", 4, &info);
        assert_eq!(record.node_execution_id, info.id);
        assert_eq!(record.execution_metadata.iteration_id.as_deref(), Some("it"));
        assert_eq!(record.execution_metadata.iteration_index, Some(2));
        assert_eq!(record.predecessor_node_id.as_deref(), Some("it_start"));

        let finished = record.created_at + Duration::milliseconds(1500);
        record.finish(NodeExecutionStatus::Succeeded, finished);
        assert!((record.elapsed_time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_metadata_merge_keeps_unknown_keys() {
        let mut metadata = ExecutionMetadata::default();
        let reported = json!({"total_tokens": 9, "loop_round": 3});
        metadata.merge_reported(reported.as_object().unwrap(), 0);
        assert_eq!(metadata.total_tokens, 9);
        assert_eq!(metadata.extra.get("loop_round"), Some(&json!(3)));

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["loop_round"], json!(3));
        assert!(value.get("iteration_id").is_none());
    }
}
