//! Read-only view of the runtime state handed to engine layers

use super::state::GraphRuntimeState;
use super::usage::LlmUsage;
use crate::variables::VariablePool;
use chrono::{DateTime, Utc};
use parking_lot::RwLockReadGuard;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Getters over a [`GraphRuntimeState`] with no way to mutate it
#[derive(Debug, Clone)]
pub struct ReadOnlyGraphRuntimeState {
    state: Arc<GraphRuntimeState>,
}

impl ReadOnlyGraphRuntimeState {
    pub fn new(state: Arc<GraphRuntimeState>) -> Self {
        Self { state }
    }

    pub fn variable_pool(&self) -> RwLockReadGuard<'_, VariablePool> {
        self.state.variable_pool()
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.state.start_at()
    }

    pub fn total_tokens(&self) -> u64 {
        self.state.total_tokens()
    }

    pub fn node_run_steps(&self) -> u64 {
        self.state.node_run_steps()
    }

    pub fn llm_usage(&self) -> LlmUsage {
        self.state.llm_usage()
    }

    pub fn outputs(&self) -> Map<String, Value> {
        self.state.outputs()
    }

    pub fn get_output(&self, key: &str) -> Option<Value> {
        self.state.get_output(key)
    }

    pub fn paused_nodes(&self) -> Vec<String> {
        self.state.paused_nodes()
    }

    pub fn exceptions_count(&self) -> u64 {
        self.state.graph_execution().exceptions_count()
    }

    pub fn ready_queue_size(&self) -> usize {
        self.state.ready_queue().len()
    }
}
