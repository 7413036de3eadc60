//! # graphflow-core - Queue-based Workflow Graph Engine
//!
//! `graphflow-core` executes workflow graphs made of typed nodes joined by handle-labelled
//! edges. It provides:
//!
//! - **Variable pool** - `(scope, name)` addressed typed values with template rendering
//! - **Runtime state** - Token and step counters, run outputs and versioned snapshots
//! - **Graph engine** - Worker-pool dispatch with branch selection and skip propagation
//! - **Response streaming** - Ordered chunk output for answer and end nodes
//! - **Error handling** - Per-node retry, `fail-branch` and `default-value` strategies
//! - **Containers** - Sequential and parallel iteration, bounded loops
//! - **Control** - Abort commands, pause/resume, step and time budgets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use graphflow_core::{
//!     Graph, GraphConfig, GraphEngine, GraphEngineEvent, GraphRuntimeState, NodeRegistry,
//!     RunContext, VariablePool,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> graphflow_core::Result<()> {
//!     let config: GraphConfig = serde_json::from_value(serde_json::json!({
//!         "nodes": [
//!             {"id": "start", "data": {"type": "start"}},
//!             {"id": "answer", "data": {"type": "answer", "answer": "Hi {{#sys.query#}}"}}
//!         ],
//!         "edges": [{"source": "start", "target": "answer"}]
//!     }))?;
//!
//!     let registry = Arc::new(NodeRegistry::with_builtins());
//!     let config = Arc::new(config);
//!     let graph = Arc::new(Graph::init(&config, registry.as_ref(), None)?);
//!     let state = Arc::new(GraphRuntimeState::new(VariablePool::empty()));
//!     let context = Arc::new(RunContext::new(config, registry));
//!
//!     let mut events = GraphEngine::new(graph, state, context)?.run();
//!     while let Some(event) = events.next().await {
//!         if let GraphEngineEvent::NodeRunStreamChunk { chunk, .. } = &event {
//!             print!("{}", chunk);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   GraphConfig ──▶ Graph::init ──▶ Graph (nodes, edges, root)
//!                                      │
//!                                      ▼
//!   GraphRuntimeState ◀──────── GraphEngine ──▶ EventStream
//!    • VariablePool                   │
//!    • counters / outputs             ▼
//!    • ReadyQueue             ┌──────────────┐      ┌──────────────────┐
//!    • GraphExecution         │  Dispatcher  │─────▶│ worker tasks     │
//!    • ResponseCoordinator    │  edges/skip  │◀─────│ Node::run(ctx)   │
//!                             └──────────────┘      └──────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`variables`] - Segments, files, selectors, templates and the [`VariablePool`]
//! - [`graph`] - Graph definitions and the validated [`Graph`]
//! - [`node`] - The [`Node`] trait, [`NodeRunResult`] and [`NodeRegistry`]
//! - [`nodes`] - Built-in node types
//! - [`runtime`] - [`GraphRuntimeState`] and its collaborators
//! - [`engine`] - [`GraphEngine`], commands and layers
//! - [`events`] - [`GraphEngineEvent`]
//! - [`config`] - [`EngineConfig`] limits and their sources
//! - [`retry`] - Node retry settings

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod retry;
pub mod runtime;
pub mod variables;

pub use config::EngineConfig;
pub use context::{InvokeFrom, RunContext};
pub use engine::{
    command_channel, CommandReceiver, CommandSender, DebugLoggingLayer, EventStream,
    GraphEngine, GraphEngineCommand, GraphEngineLayer,
};
pub use error::{GraphError, Result};
pub use events::{GraphEngineEvent, NodeEventInfo, ParallelBranchInfo};
pub use graph::{
    DefaultValue, Edge, EdgeConfig, ErrorStrategy, Graph, GraphConfig, GraphNode, NodeConfig,
    NodeData,
};
pub use node::{
    Node, NodeContext, NodeEventSink, NodeExecutionType, NodeFactory, NodeRegistry,
    NodeRunResult, NodeRunStatus,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use runtime::{
    CollaboratorFactory, DefaultCollaborators, GraphRuntimeState, LlmUsage,
    ReadOnlyGraphRuntimeState, SNAPSHOT_VERSION,
};
pub use variables::{File, Segment, SegmentGroup, SystemVariables, Template, Variable, VariablePool};
