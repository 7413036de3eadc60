//! Nested runs for container nodes
//!
//! Iteration and loop nodes run their body as a separate [`Graph`] rooted at the body's start
//! node. Each pass gets its own [`GraphEngine`]; the pass's events are tagged with the
//! container's id and index and forwarded through the container's event sink.

use crate::engine::GraphEngine;
use crate::error::Result;
use crate::events::GraphEngineEvent;
use crate::graph::Graph;
use crate::node::{NodeContext, NodeEventSink};
use crate::runtime::GraphRuntimeState;
use crate::variables::VariablePool;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a pass sits inside its container
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    Iteration {
        index: usize,
        parallel_mode_run_id: Option<String>,
    },
    Loop {
        index: usize,
    },
}

/// Body graph of one container node
#[derive(Clone)]
pub(crate) struct SubGraph {
    container_id: String,
    graph: Arc<Graph>,
    run_context: Arc<crate::context::RunContext>,
}

impl SubGraph {
    /// Build the body rooted at `start_node_id` from the run's full graph configuration
    pub(crate) fn build(ctx: &NodeContext, start_node_id: &str) -> Result<Self> {
        let run_context = ctx.run_context.clone();
        let graph = Graph::init(
            &run_context.graph_config,
            run_context.node_factory.as_ref(),
            Some(start_node_id),
        )?;
        Ok(Self {
            container_id: ctx.node_id().to_string(),
            graph: Arc::new(graph),
            run_context,
        })
    }

    /// Drop every binding produced by body nodes
    pub(crate) fn clear_scopes(&self, pool: &mut VariablePool) {
        for node_id in self.graph.node_ids() {
            pool.remove(&[node_id.as_str()]);
        }
    }

    fn tag(&self, event: &mut GraphEngineEvent, placement: &Placement) {
        if let Some(info) = event.node_info_mut() {
            match placement {
                Placement::Iteration {
                    index,
                    parallel_mode_run_id,
                } => {
                    if info.in_iteration_id.is_none() && info.in_loop_id.is_none() {
                        info.in_iteration_id = Some(self.container_id.clone());
                        info.iteration_index = Some(*index);
                    }
                    if info.parallel_mode_run_id.is_none() {
                        info.parallel_mode_run_id = parallel_mode_run_id.clone();
                    }
                }
                Placement::Loop { index } => {
                    if info.in_iteration_id.is_none() && info.in_loop_id.is_none() {
                        info.in_loop_id = Some(self.container_id.clone());
                        info.loop_index = Some(*index);
                    }
                }
            }
        } else if let Some(branch) = event.branch_info_mut() {
            if branch.in_iteration_id.is_none() && branch.in_loop_id.is_none() {
                match placement {
                    Placement::Iteration { .. } => {
                        branch.in_iteration_id = Some(self.container_id.clone())
                    }
                    Placement::Loop { .. } => branch.in_loop_id = Some(self.container_id.clone()),
                }
            }
        }
    }

    /// Run one pass over `state` and forward its events
    ///
    /// Returns the error message when the pass did not succeed. Events raised after `cancel`
    /// fired are dropped.
    pub(crate) async fn run(
        &self,
        state: Arc<GraphRuntimeState>,
        placement: Placement,
        sink: &NodeEventSink,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<(), String> {
        let engine = GraphEngine::new(self.graph.clone(), state, self.run_context.clone())
            .map_err(|e| e.to_string())?;
        let mut events = engine.run();

        let mut outcome: std::result::Result<(), String> =
            Err("Nested run ended without a result".to_string());
        while let Some(mut event) = events.next().await {
            match event {
                GraphEngineEvent::GraphRunSucceeded { .. }
                | GraphEngineEvent::GraphRunPartialSucceeded { .. } => {
                    outcome = Ok(());
                    continue;
                }
                GraphEngineEvent::GraphRunFailed { error, .. } => {
                    outcome = Err(error);
                    continue;
                }
                GraphEngineEvent::GraphRunAborted { reason, .. } => {
                    outcome = Err(reason.unwrap_or_else(|| "Nested run aborted".to_string()));
                    continue;
                }
                GraphEngineEvent::GraphRunPaused { .. } => {
                    outcome = Err("Pausing inside a container node is not supported".to_string());
                    continue;
                }
                GraphEngineEvent::GraphRunStarted | GraphEngineEvent::Ping => continue,
                _ => {}
            }

            if cancel.map_or(false, CancellationToken::is_cancelled) {
                continue;
            }
            self.tag(&mut event, &placement);
            sink.emit(event).await.map_err(|e| e.to_string())?;
        }
        outcome
    }
}
