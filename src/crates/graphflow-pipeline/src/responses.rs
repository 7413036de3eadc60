//! Client-facing stream responses
//!
//! Every response carries the task id and the run id next to an `event` name and its `data`:
//!
//! ```json
//! {"task_id": "...", "workflow_run_id": "...", "event": "node_started", "data": {...}}
//! ```

use crate::entities::{NodeExecution, WorkflowRun};
use graphflow_core::File;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub task_id: String,

    pub workflow_run_id: String,

    #[serde(flatten)]
    pub event: ResponseEvent,
}

impl StreamResponse {
    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ResponseEvent {
    WorkflowStarted(WorkflowStartData),
    WorkflowFinished(WorkflowFinishData),
    NodeStarted(NodeStartData),
    NodeFinished(NodeFinishData),
    NodeRetry(NodeRetryData),
    TextChunk(TextChunkData),
    IterationStarted(ContainerStartData),
    IterationNext(ContainerNextData),
    IterationCompleted(ContainerCompletedData),
    LoopStarted(ContainerStartData),
    LoopNext(ContainerNextData),
    LoopCompleted(ContainerCompletedData),
    ParallelBranchStarted(ParallelBranchData),
    ParallelBranchFinished(ParallelBranchData),
    Ping,
}

impl ResponseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted(_) => "workflow_started",
            Self::WorkflowFinished(_) => "workflow_finished",
            Self::NodeStarted(_) => "node_started",
            Self::NodeFinished(_) => "node_finished",
            Self::NodeRetry(_) => "node_retry",
            Self::TextChunk(_) => "text_chunk",
            Self::IterationStarted(_) => "iteration_started",
            Self::IterationNext(_) => "iteration_next",
            Self::IterationCompleted(_) => "iteration_completed",
            Self::LoopStarted(_) => "loop_started",
            Self::LoopNext(_) => "loop_next",
            Self::LoopCompleted(_) => "loop_completed",
            Self::ParallelBranchStarted(_) => "parallel_branch_started",
            Self::ParallelBranchFinished(_) => "parallel_branch_finished",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStartData {
    pub id: String,
    pub workflow_id: String,
    pub sequence_number: u64,
    pub inputs: Map<String, Value>,
    /// Unix seconds
    pub created_at: i64,
}

impl From<&WorkflowRun> for WorkflowStartData {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            sequence_number: run.sequence_number,
            inputs: run.inputs.clone(),
            created_at: run.created_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFinishData {
    pub id: String,
    pub workflow_id: String,
    pub sequence_number: u64,
    pub status: String,
    pub outputs: Map<String, Value>,
    pub error: Option<String>,
    pub elapsed_time: f64,
    pub total_tokens: u64,
    pub total_steps: u64,
    pub exceptions_count: u64,
    pub created_by: String,
    pub created_at: i64,
    pub finished_at: i64,
    pub files: Vec<Value>,
    /// Set when the run stopped at a human-input gate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paused_nodes: Vec<String>,
}

impl WorkflowFinishData {
    pub fn from_run(run: &WorkflowRun, paused_nodes: Vec<String>) -> Self {
        Self {
            id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            sequence_number: run.sequence_number,
            status: run.status.to_string(),
            outputs: run.outputs.clone(),
            error: run.error.clone(),
            elapsed_time: run.elapsed_time,
            total_tokens: run.total_tokens,
            total_steps: run.total_steps,
            exceptions_count: run.exceptions_count,
            created_by: run.created_by.clone(),
            created_at: run.created_at.timestamp(),
            finished_at: run.finished_at.unwrap_or(run.created_at).timestamp(),
            files: fetch_files(&run.outputs),
            paused_nodes,
        }
    }
}

/// Parallel and container placement shared by node responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_start_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_start_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_run_id: Option<String>,
}

impl From<&graphflow_core::NodeEventInfo> for Placement {
    fn from(info: &graphflow_core::NodeEventInfo) -> Self {
        Self {
            parallel_id: info.parallel_id.clone(),
            parallel_start_node_id: info.parallel_start_node_id.clone(),
            parent_parallel_id: info.parent_parallel_id.clone(),
            parent_parallel_start_node_id: info.parent_parallel_start_node_id.clone(),
            iteration_id: info.in_iteration_id.clone(),
            loop_id: info.in_loop_id.clone(),
            parallel_run_id: info.parallel_mode_run_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStartData {
    /// Node-execution record id
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub index: u64,
    pub predecessor_node_id: Option<String>,
    pub created_at: i64,
    #[serde(flatten)]
    pub placement: Placement,
}

impl NodeStartData {
    pub fn new(record: &NodeExecution, placement: Placement) -> Self {
        Self {
            id: record.id.clone(),
            node_id: record.node_id.clone(),
            node_type: record.node_type.clone(),
            title: record.title.clone(),
            index: record.index,
            predecessor_node_id: record.predecessor_node_id.clone(),
            created_at: record.created_at.timestamp(),
            placement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFinishData {
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub index: u64,
    pub predecessor_node_id: Option<String>,
    pub inputs: Map<String, Value>,
    pub process_data: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub status: String,
    pub error: Option<String>,
    pub elapsed_time: f64,
    pub execution_metadata: Value,
    pub created_at: i64,
    pub finished_at: i64,
    pub files: Vec<Value>,
    #[serde(flatten)]
    pub placement: Placement,
}

impl NodeFinishData {
    pub fn new(record: &NodeExecution, placement: Placement) -> Self {
        Self {
            id: record.id.clone(),
            node_id: record.node_id.clone(),
            node_type: record.node_type.clone(),
            title: record.title.clone(),
            index: record.index,
            predecessor_node_id: record.predecessor_node_id.clone(),
            inputs: record.inputs.clone(),
            process_data: record.process_data.clone(),
            outputs: record.outputs.clone(),
            status: record.status.to_string(),
            error: record.error.clone(),
            elapsed_time: record.elapsed_time,
            execution_metadata: serde_json::to_value(&record.execution_metadata)
                .unwrap_or(Value::Null),
            created_at: record.created_at.timestamp(),
            finished_at: record.finished_at.unwrap_or(record.created_at).timestamp(),
            files: fetch_files(&record.outputs),
            placement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRetryData {
    #[serde(flatten)]
    pub node: NodeFinishData,
    pub retry_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunkData {
    pub text: String,
    pub from_variable_selector: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStartData {
    /// Node execution id of the iteration or loop node
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub created_at: i64,
    pub inputs: Map<String, Value>,
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerNextData {
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub index: usize,
    pub pre_output: Option<Value>,
    pub created_at: i64,
    /// Seconds spent on the previous round, when known
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerCompletedData {
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub status: String,
    pub error: Option<String>,
    pub elapsed_time: f64,
    pub total_tokens: u64,
    pub steps: usize,
    /// Seconds per round keyed by round index
    pub durations: Map<String, Value>,
    pub created_at: i64,
    pub finished_at: i64,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBranchData {
    pub parallel_id: String,
    pub parallel_branch_id: String,
    pub parent_parallel_id: Option<String>,
    pub parent_parallel_start_node_id: Option<String>,
    pub iteration_id: Option<String>,
    pub loop_id: Option<String>,
    /// `None` on the started response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
}

/// Answer to a blocking invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBlockingResponse {
    pub task_id: String,
    pub workflow_run_id: String,
    pub data: WorkflowFinishData,
}

/// File values found at the top level of `outputs`, including inside lists
pub fn fetch_files(outputs: &Map<String, Value>) -> Vec<Value> {
    let mut files = Vec::new();
    for value in outputs.values() {
        match value {
            Value::Array(items) => files.extend(
                items
                    .iter()
                    .filter(|item| File::is_file_value(item))
                    .cloned(),
            ),
            value if File::is_file_value(value) => files.push(value.clone()),
            _ => {}
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphflow_core::variables::FileType;
    use serde_json::json;

    #[test]
    fn test_envelope_layout() {
        let response = StreamResponse {
            task_id: "task".into(),
            workflow_run_id: "run".into(),
            event: ResponseEvent::TextChunk(TextChunkData {
                text: "Hi".into(),
                from_variable_selector: vec!["answer".into(), "answer".into()],
            }),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["event"], json!("text_chunk"));
        assert_eq!(value["task_id"], json!("task"));
        assert_eq!(value["data"]["text"], json!("Hi"));
        assert_eq!(response.name(), "text_chunk");
    }

    #[test]
    fn test_fetch_files_scans_lists() {
        let image = File::remote(FileType::Image, "https://example.com/a.png").to_value();
        let mut outputs = Map::new();
        outputs.insert("one".into(), image.clone());
        outputs.insert("many".into(), json!([image.clone(), 3]));
        outputs.insert("text".into(), json!("plain"));

        assert_eq!(fetch_files(&outputs).len(), 2);
        assert!(fetch_files(&Map::new()).is_empty());
    }
}
