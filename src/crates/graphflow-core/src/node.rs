//! Node abstraction
//!
//! A node is anything that implements [`Node`]. The engine does not know what a node
//! computes; it only needs the node's [`NodeExecutionType`], an optional streaming template
//! for response nodes, and the [`NodeRunResult`] of one run.
//!
//! ```text
//! NodeConfig ──► NodeFactory::create ──► Arc<dyn Node>
//!                      │
//!                NodeRegistry: "type" ─► constructor
//! ```
//!
//! Nodes read inputs from and may write to the variable pool through
//! [`NodeContext::runtime_state`]. Their declared `outputs` are stored under
//! `(node_id, key)` by the engine once the run succeeds.

use crate::context::RunContext;
use crate::error::{GraphError, Result};
use crate::events::{GraphEngineEvent, NodeEventInfo};
use crate::graph::NodeConfig;
use crate::runtime::{GraphRuntimeState, LlmUsage};
use crate::variables::Template;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle selected by nodes whose `error_strategy` is `fail-branch`
pub const FAIL_BRANCH_HANDLE: &str = "fail-branch";
/// Handle of an ordinary outgoing edge
pub const SOURCE_HANDLE: &str = "source";

/// How the engine treats a node's completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionType {
    /// Takes every outgoing edge on success
    Executable,
    /// Produces streamed output through a template
    Response,
    /// Selects outgoing edges by handle
    Branch,
    /// Runs a nested sub-graph
    Container,
    /// Entry point of a graph
    Root,
}

/// Outcome status of one node run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Succeeded,
    Failed,
    Exception,
    Paused,
}

/// Result of one node run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunResult {
    pub status: NodeRunStatus,

    #[serde(default)]
    pub inputs: Map<String, Value>,

    #[serde(default)]
    pub process_data: Map<String, Value>,

    #[serde(default)]
    pub outputs: Map<String, Value>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default)]
    pub llm_usage: LlmUsage,

    /// Outgoing handle chosen by branch nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_source_handle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl NodeRunResult {
    fn with_status(status: NodeRunStatus) -> Self {
        Self {
            status,
            inputs: Map::new(),
            process_data: Map::new(),
            outputs: Map::new(),
            metadata: Map::new(),
            llm_usage: LlmUsage::empty(),
            edge_source_handle: None,
            error: None,
            error_type: None,
        }
    }

    pub fn succeeded(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            ..Self::with_status(NodeRunStatus::Succeeded)
        }
    }

    pub fn failed(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_type: Some(error_type.into()),
            ..Self::with_status(NodeRunStatus::Failed)
        }
    }

    /// Result of a node waiting for external input
    pub fn paused() -> Self {
        Self::with_status(NodeRunStatus::Paused)
    }

    pub fn from_error(error: &GraphError) -> Self {
        Self::failed(error.to_string(), error.error_type())
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_process_data(mut self, process_data: Map<String, Value>) -> Self {
        self.process_data = process_data;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_llm_usage(mut self, usage: LlmUsage) -> Self {
        self.llm_usage = usage;
        self
    }

    pub fn with_edge_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.edge_source_handle = Some(handle.into());
        self
    }

    pub fn error_message(&self) -> String {
        self.error.clone().unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// Sender side of a node's event channel
///
/// Nodes use it to stream chunks and to report iteration and loop progress. Events are
/// delivered to the engine in send order.
#[derive(Clone)]
pub struct NodeEventSink {
    tx: mpsc::Sender<GraphEngineEvent>,
    info: NodeEventInfo,
}

impl NodeEventSink {
    pub fn new(tx: mpsc::Sender<GraphEngineEvent>, info: NodeEventInfo) -> Self {
        Self { tx, info }
    }

    /// A sink and the receiver it feeds
    pub fn channel(
        info: NodeEventInfo,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<GraphEngineEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx, info), rx)
    }

    pub fn info(&self) -> &NodeEventInfo {
        &self.info
    }

    pub async fn emit(&self, event: GraphEngineEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| GraphError::Execution("Engine event channel closed".to_string()))
    }

    /// Stream a chunk of the value that will end up at `selector`
    pub async fn stream_chunk(
        &self,
        selector: Vec<String>,
        chunk: impl Into<String>,
        is_final: bool,
    ) -> Result<()> {
        self.emit(GraphEngineEvent::NodeRunStreamChunk {
            info: self.info.clone(),
            selector,
            chunk: chunk.into(),
            is_final,
        })
        .await
    }
}

impl fmt::Debug for NodeEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEventSink")
            .field("node_id", &self.info.node_id)
            .field("execution_id", &self.info.id)
            .finish()
    }
}

/// Everything a node gets for one run
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub info: NodeEventInfo,

    pub runtime_state: Arc<GraphRuntimeState>,

    pub run_context: Arc<RunContext>,

    pub events: NodeEventSink,
}

impl NodeContext {
    pub fn node_id(&self) -> &str {
        &self.info.node_id
    }

    pub fn execution_id(&self) -> &str {
        &self.info.id
    }
}

/// One step of a workflow graph
#[async_trait]
pub trait Node: Send + Sync {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Executable
    }

    /// Template streamed by response nodes
    fn streaming_template(&self) -> Option<Template> {
        None
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult>;
}

/// Builds node instances from their configuration
pub trait NodeFactory: Send + Sync {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn Node>>;
}

/// Constructor registered for one node type
pub type NodeConstructor = Arc<dyn Fn(&NodeConfig) -> Result<Arc<dyn Node>> + Send + Sync>;

/// [`NodeFactory`] keyed by the `data.type` of a node
///
/// ```rust
/// use graphflow_core::{NodeFactory, NodeRegistry};
/// use graphflow_core::graph::NodeConfig;
///
/// let registry = NodeRegistry::with_builtins();
/// let config: NodeConfig = serde_json::from_value(serde_json::json!({
///     "id": "n", "data": {"type": "unknown-kind", "title": "?"}
/// })).unwrap();
/// assert!(registry.create(&config).is_err());
/// ```
#[derive(Clone, Default)]
pub struct NodeRegistry {
    constructors: HashMap<String, NodeConstructor>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `start`, `end`, `answer`, `if-else`, `iteration`, `loop` and their
    /// start markers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, node_type: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&NodeConfig) -> Result<Arc<dyn Node>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(node_type.into(), Arc::new(constructor));
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_node<F>(mut self, node_type: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&NodeConfig) -> Result<Arc<dyn Node>> + Send + Sync + 'static,
    {
        self.register(node_type, constructor);
        self
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.constructors.contains_key(node_type)
    }

    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl NodeFactory for NodeRegistry {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn Node>> {
        let constructor = self.constructors.get(&config.data.node_type).ok_or_else(|| {
            GraphError::Configuration(format!(
                "Unknown node type '{}' for node '{}'",
                config.data.node_type, config.id
            ))
        })?;
        constructor(config)
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
