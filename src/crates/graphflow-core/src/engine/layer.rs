//! Engine layers
//!
//! A layer observes a run without being able to change it. Each hook gets a
//! [`ReadOnlyGraphRuntimeState`]; an error returned from a hook is logged and the run goes on.

use crate::error::Result;
use crate::events::GraphEngineEvent;
use crate::runtime::ReadOnlyGraphRuntimeState;
use std::sync::Arc;

/// Observer attached to a [`GraphEngine`](super::GraphEngine)
pub trait GraphEngineLayer: Send + Sync {
    fn name(&self) -> &str;

    fn on_graph_start(&self, _state: &ReadOnlyGraphRuntimeState) -> Result<()> {
        Ok(())
    }

    fn on_event(&self, _event: &GraphEngineEvent, _state: &ReadOnlyGraphRuntimeState) -> Result<()> {
        Ok(())
    }

    fn on_graph_end(&self, _error: Option<&str>, _state: &ReadOnlyGraphRuntimeState) -> Result<()> {
        Ok(())
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Default)]
pub struct DebugLoggingLayer {
    include_outputs: bool,
}

impl DebugLoggingLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log the run outputs when the graph ends
    pub fn with_outputs(mut self, include_outputs: bool) -> Self {
        self.include_outputs = include_outputs;
        self
    }
}

impl GraphEngineLayer for DebugLoggingLayer {
    fn name(&self) -> &str {
        "debug_logging"
    }

    fn on_graph_start(&self, state: &ReadOnlyGraphRuntimeState) -> Result<()> {
        tracing::debug!(start_at = %state.start_at(), "Graph run started");
        Ok(())
    }

    fn on_event(&self, event: &GraphEngineEvent, _state: &ReadOnlyGraphRuntimeState) -> Result<()> {
        match event.node_info() {
            Some(info) => tracing::debug!(
                event = event.name(),
                node_id = %info.node_id,
                execution_id = %info.id,
                "Engine event"
            ),
            None => tracing::debug!(event = event.name(), "Engine event"),
        }
        Ok(())
    }

    fn on_graph_end(&self, error: Option<&str>, state: &ReadOnlyGraphRuntimeState) -> Result<()> {
        if self.include_outputs {
            tracing::debug!(
                error = ?error,
                steps = state.node_run_steps(),
                total_tokens = state.total_tokens(),
                outputs = ?state.outputs(),
                "Graph run ended"
            );
        } else {
            tracing::debug!(
                error = ?error,
                steps = state.node_run_steps(),
                total_tokens = state.total_tokens(),
                "Graph run ended"
            );
        }
        Ok(())
    }
}

/// Ordered layers with error isolation
#[derive(Clone, Default)]
pub(crate) struct LayerSet {
    layers: Vec<Arc<dyn GraphEngineLayer>>,
}

impl LayerSet {
    pub(crate) fn push(&mut self, layer: Arc<dyn GraphEngineLayer>) {
        self.layers.push(layer);
    }

    pub(crate) fn on_graph_start(&self, state: &ReadOnlyGraphRuntimeState) {
        for layer in &self.layers {
            if let Err(e) = layer.on_graph_start(state) {
                tracing::warn!(layer = layer.name(), error = %e, "Layer failed on graph start");
            }
        }
    }

    pub(crate) fn on_event(&self, event: &GraphEngineEvent, state: &ReadOnlyGraphRuntimeState) {
        for layer in &self.layers {
            if let Err(e) = layer.on_event(event, state) {
                tracing::warn!(layer = layer.name(), error = %e, "Layer failed on event");
            }
        }
    }

    pub(crate) fn on_graph_end(&self, error: Option<&str>, state: &ReadOnlyGraphRuntimeState) {
        for layer in &self.layers {
            if let Err(e) = layer.on_graph_end(error, state) {
                tracing::warn!(layer = layer.name(), error = %e, "Layer failed on graph end");
            }
        }
    }
}
