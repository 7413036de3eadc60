//! Graph engine
//!
//! [`GraphEngine`] drives one graph over one [`GraphRuntimeState`] and reports progress as a
//! stream of [`GraphEngineEvent`]s.
//!
//! ```rust,no_run
//! use graphflow_core::{GraphConfig, Graph, GraphEngine, GraphRuntimeState, NodeRegistry, RunContext, VariablePool};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example(config: GraphConfig) -> graphflow_core::Result<()> {
//! let registry = Arc::new(NodeRegistry::with_builtins());
//! let config = Arc::new(config);
//! let graph = Arc::new(Graph::init(&config, registry.as_ref(), None)?);
//! let state = Arc::new(GraphRuntimeState::new(VariablePool::empty()));
//! let context = Arc::new(RunContext::new(config, registry));
//!
//! let mut events = GraphEngine::new(graph, state, context)?.run();
//! while let Some(event) = events.next().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Dispatch, edge handling and branch bookkeeping live in the submodules; the engine itself
//! only validates the setup and spawns the dispatch loop.

pub mod command;
mod branches;
mod dispatcher;
mod edges;
pub mod layer;
mod worker;

pub use command::{command_channel, CommandReceiver, CommandSender, GraphEngineCommand};
pub use layer::{DebugLoggingLayer, GraphEngineLayer};

use crate::context::RunContext;
use crate::error::{GraphError, Result};
use crate::events::GraphEngineEvent;
use crate::graph::Graph;
use crate::runtime::GraphRuntimeState;
use dispatcher::Dispatcher;
use futures::Stream;
use graphflow_checkpoint::SnapshotStore;
use layer::LayerSet;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events of one run, ending with exactly one graph-terminal event
pub type EventStream = Pin<Box<dyn Stream<Item = GraphEngineEvent> + Send>>;

/// Queue-based executor of a [`Graph`]
pub struct GraphEngine {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    run_context: Arc<RunContext>,
    layers: LayerSet,
    commands: Option<CommandReceiver>,
    snapshot: Option<(Arc<dyn SnapshotStore>, String)>,
}

impl GraphEngine {
    /// Bind `graph` to `state`
    ///
    /// Fails when the engine config is invalid, the state already belongs to another graph or
    /// the call depth is over the configured limit.
    pub fn new(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        run_context: Arc<RunContext>,
    ) -> Result<Self> {
        run_context.config.validate()?;
        let max_depth = run_context.config.max_call_depth;
        if run_context.call_depth > max_depth {
            return Err(GraphError::Configuration(format!(
                "Max workflow call depth {} reached.",
                max_depth
            )));
        }

        state.attach_graph(graph.clone())?;
        {
            let mut execution = state.graph_execution();
            if execution.workflow_id().is_empty() {
                execution.set_workflow_id(&run_context.workflow_id);
            }
        }
        {
            let mut coordinator = state.response_coordinator()?;
            for node_id in graph.response_node_ids() {
                coordinator.register(&node_id);
            }
        }

        Ok(Self {
            graph,
            state,
            run_context,
            layers: LayerSet::default(),
            commands: None,
            snapshot: None,
        })
    }

    pub fn with_layer(mut self, layer: Arc<dyn GraphEngineLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_command_channel(mut self, commands: CommandReceiver) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Store a snapshot of the runtime state under `run_id` when the run ends
    pub fn with_snapshot_store(
        mut self,
        store: Arc<dyn SnapshotStore>,
        run_id: impl Into<String>,
    ) -> Self {
        self.snapshot = Some((store, run_id.into()));
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn runtime_state(&self) -> &Arc<GraphRuntimeState> {
        &self.state
    }

    pub fn run_context(&self) -> &Arc<RunContext> {
        &self.run_context
    }

    /// Start the run on the current Tokio runtime
    pub fn run(self) -> EventStream {
        let (tx, rx) = mpsc::channel(self.run_context.config.event_buffer.max(1));
        let dispatcher = Dispatcher::new(
            self.graph,
            self.state,
            self.run_context,
            self.layers,
            self.commands,
            self.snapshot,
            tx,
        );
        tokio::spawn(dispatcher.run());
        Box::pin(ReceiverStream::new(rx))
    }
}
