//! Graph runtime state
//!
//! The mutable aggregate every engine works on. It owns the variable pool, the run counters
//! and outputs, and three collaborators that are built lazily through a
//! [`CollaboratorFactory`]:
//!
//! ```text
//! GraphRuntimeState
//! ├── variable_pool          Arc<RwLock<VariablePool>>
//! ├── counters / outputs     total_tokens, node_run_steps, llm_usage, outputs, paused_nodes
//! ├── ready_queue            ┐
//! ├── graph_execution        ├── built on first access, restored from pending payloads
//! └── response_coordinator   ┘   (coordinator needs an attached graph)
//! ```
//!
//! # Snapshot document
//!
//! [`GraphRuntimeState::dumps`] writes a single JSON object:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "start_at": "2024-01-01T00:00:00Z",
//!   "total_tokens": 42,
//!   "node_run_steps": 3,
//!   "llm_usage": {"prompt_tokens": 30, "completion_tokens": 12, "total_tokens": 42, "...": 0},
//!   "outputs": {"answer": "hi"},
//!   "variable_pool": {"variable_dictionary": {}, "user_inputs": {}},
//!   "ready_queue": "{\"type\":\"InMemoryReadyQueue\",...}",
//!   "graph_execution": "{\"type\":\"GraphExecution\",...}",
//!   "paused_nodes": [],
//!   "response_coordinator": "{\"type\":\"ResponseStreamCoordinator\",...}"
//! }
//! ```
//!
//! Collaborator states are nested documents so that each collaborator owns its own format.

use super::coordinator::ResponseCoordinator;
use super::execution::{DefaultGraphExecution, GraphExecution};
use super::factory::{CollaboratorFactory, DefaultCollaborators};
use super::ready_queue::ReadyQueue;
use super::usage::LlmUsage;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::variables::VariablePool;
use chrono::{DateTime, Utc};
use graphflow_checkpoint::SnapshotStore;
use parking_lot::{
    MappedMutexGuard, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Version tag of the runtime-state document
pub const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Clone)]
struct Counters {
    start_at: DateTime<Utc>,
    total_tokens: u64,
    node_run_steps: u64,
    llm_usage: LlmUsage,
    outputs: Map<String, Value>,
    paused_nodes: Vec<String>,
}

impl Counters {
    fn fresh() -> Self {
        Self {
            start_at: Utc::now(),
            total_tokens: 0,
            node_run_steps: 0,
            llm_usage: LlmUsage::empty(),
            outputs: Map::new(),
            paused_nodes: Vec::new(),
        }
    }
}

/// Collaborator payloads waiting to be applied on first access
#[derive(Debug, Default)]
struct PendingPayloads {
    ready_queue: Option<String>,
    graph_execution: Option<String>,
    response_coordinator: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RuntimeStateDocument {
    version: String,
    start_at: DateTime<Utc>,
    total_tokens: u64,
    node_run_steps: u64,
    #[serde(default)]
    llm_usage: LlmUsage,
    #[serde(default)]
    outputs: Map<String, Value>,
    #[serde(default)]
    variable_pool: VariablePool,
    #[serde(default)]
    ready_queue: Option<String>,
    #[serde(default)]
    graph_execution: Option<String>,
    #[serde(default)]
    paused_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_coordinator: Option<String>,
}

fn non_negative(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| GraphError::Validation(format!("{} must be non-negative, got {}", what, value)))
}

/// Shared, serializable state of one run
pub struct GraphRuntimeState {
    variable_pool: Arc<RwLock<VariablePool>>,
    counters: Mutex<Counters>,
    factory: Arc<dyn CollaboratorFactory>,
    graph: RwLock<Option<Arc<Graph>>>,
    ready_queue: Mutex<Option<Box<dyn ReadyQueue>>>,
    graph_execution: Mutex<Option<Box<dyn GraphExecution>>>,
    response_coordinator: Mutex<Option<Box<dyn ResponseCoordinator>>>,
    pending: Mutex<PendingPayloads>,
}

impl GraphRuntimeState {
    /// State over `pool` with in-memory collaborators
    pub fn new(pool: VariablePool) -> Self {
        Self::with_factory(pool, Arc::new(DefaultCollaborators))
    }

    pub fn with_factory(pool: VariablePool, factory: Arc<dyn CollaboratorFactory>) -> Self {
        Self::with_shared_pool(Arc::new(RwLock::new(pool)), factory)
    }

    /// State that works on an existing pool, as sequential iteration passes do
    pub fn with_shared_pool(
        pool: Arc<RwLock<VariablePool>>,
        factory: Arc<dyn CollaboratorFactory>,
    ) -> Self {
        Self {
            variable_pool: pool,
            counters: Mutex::new(Counters::fresh()),
            factory,
            graph: RwLock::new(None),
            ready_queue: Mutex::new(None),
            graph_execution: Mutex::new(None),
            response_coordinator: Mutex::new(None),
            pending: Mutex::new(PendingPayloads::default()),
        }
    }

    /// Rebuild a state from a document written by [`dumps`](Self::dumps)
    pub fn from_snapshot(data: &str, factory: Arc<dyn CollaboratorFactory>) -> Result<Self> {
        let state = Self::with_factory(VariablePool::empty(), factory);
        state.loads(data)?;
        Ok(state)
    }

    /// Load the newest snapshot stored for `run_id`
    pub async fn restore(
        store: &dyn SnapshotStore,
        run_id: &str,
        factory: Arc<dyn CollaboratorFactory>,
    ) -> Result<Self> {
        let snapshot = store.latest(run_id).await?.ok_or_else(|| {
            GraphError::State(format!("No snapshot stored for run '{}'", run_id))
        })?;
        tracing::info!(
            run_id = %run_id,
            snapshot_id = %snapshot.snapshot_id(),
            "Restoring runtime state from snapshot"
        );
        Self::from_snapshot(&snapshot.state, factory)
    }

    pub fn factory(&self) -> Arc<dyn CollaboratorFactory> {
        self.factory.clone()
    }

    // ---- variable pool -------------------------------------------------

    pub fn variable_pool(&self) -> RwLockReadGuard<'_, VariablePool> {
        self.variable_pool.read()
    }

    pub fn variable_pool_mut(&self) -> RwLockWriteGuard<'_, VariablePool> {
        self.variable_pool.write()
    }

    pub fn shared_pool(&self) -> Arc<RwLock<VariablePool>> {
        self.variable_pool.clone()
    }

    // ---- counters ------------------------------------------------------

    pub fn start_at(&self) -> DateTime<Utc> {
        self.counters.lock().start_at
    }

    pub fn set_start_at(&self, start_at: DateTime<Utc>) {
        self.counters.lock().start_at = start_at;
    }

    pub fn total_tokens(&self) -> u64 {
        self.counters.lock().total_tokens
    }

    pub fn set_total_tokens(&self, value: i64) -> Result<()> {
        let value = non_negative(value, "total_tokens")?;
        self.counters.lock().total_tokens = value;
        Ok(())
    }

    pub fn add_tokens(&self, delta: i64) -> Result<()> {
        let delta = non_negative(delta, "token delta")?;
        let mut counters = self.counters.lock();
        counters.total_tokens = counters.total_tokens.saturating_add(delta);
        Ok(())
    }

    pub fn node_run_steps(&self) -> u64 {
        self.counters.lock().node_run_steps
    }

    pub fn set_node_run_steps(&self, value: i64) -> Result<()> {
        let value = non_negative(value, "node_run_steps")?;
        self.counters.lock().node_run_steps = value;
        Ok(())
    }

    /// Count one more node dispatch and return the new total
    pub fn increment_node_run_steps(&self) -> u64 {
        let mut counters = self.counters.lock();
        counters.node_run_steps += 1;
        counters.node_run_steps
    }

    pub fn llm_usage(&self) -> LlmUsage {
        self.counters.lock().llm_usage.clone()
    }

    pub fn set_llm_usage(&self, usage: LlmUsage) {
        self.counters.lock().llm_usage = usage;
    }

    pub fn add_llm_usage(&self, usage: &LlmUsage) {
        let mut counters = self.counters.lock();
        counters.llm_usage = counters.llm_usage.plus(usage);
    }

    /// Fold a finished child state's token usage into this one
    pub fn merge_child_usage(&self, child: &GraphRuntimeState) -> Result<()> {
        let tokens = i64::try_from(child.total_tokens()).unwrap_or(i64::MAX);
        self.add_tokens(tokens)?;
        self.add_llm_usage(&child.llm_usage());
        Ok(())
    }

    // ---- outputs -------------------------------------------------------

    /// Copy of the run outputs
    pub fn outputs(&self) -> Map<String, Value> {
        self.counters.lock().outputs.clone()
    }

    pub fn set_outputs(&self, outputs: Map<String, Value>) {
        self.counters.lock().outputs = outputs;
    }

    pub fn set_output(&self, key: impl Into<String>, value: Value) {
        self.counters.lock().outputs.insert(key.into(), value);
    }

    pub fn get_output(&self, key: &str) -> Option<Value> {
        self.counters.lock().outputs.get(key).cloned()
    }

    pub fn update_outputs(&self, updates: Map<String, Value>) {
        self.counters.lock().outputs.extend(updates);
    }

    // ---- paused nodes --------------------------------------------------

    pub fn register_paused_node(&self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        let mut counters = self.counters.lock();
        if !counters.paused_nodes.contains(&node_id) {
            counters.paused_nodes.push(node_id);
        }
    }

    /// Take every paused node id, leaving the list empty
    pub fn consume_paused_nodes(&self) -> Vec<String> {
        std::mem::take(&mut self.counters.lock().paused_nodes)
    }

    pub fn paused_nodes(&self) -> Vec<String> {
        self.counters.lock().paused_nodes.clone()
    }

    // ---- graph and collaborators ---------------------------------------

    /// Attach the graph this state runs; attaching a different graph is an error
    pub fn attach_graph(&self, graph: Arc<Graph>) -> Result<()> {
        let mut slot = self.graph.write();
        match slot.as_ref() {
            Some(existing) if !Arc::ptr_eq(existing, &graph) => Err(GraphError::Configuration(
                "GraphRuntimeState is already attached to a different graph".to_string(),
            )),
            Some(_) => Ok(()),
            None => {
                *slot = Some(graph);
                Ok(())
            }
        }
    }

    pub fn graph(&self) -> Option<Arc<Graph>> {
        self.graph.read().clone()
    }

    fn build_ready_queue(&self) -> Box<dyn ReadyQueue> {
        let mut queue = self.factory.create_ready_queue();
        if let Some(payload) = self.pending.lock().ready_queue.take() {
            if let Err(e) = queue.loads(&payload) {
                tracing::warn!(error = %e, "Failed to restore ready queue, starting empty");
            }
        }
        queue
    }

    fn build_graph_execution(&self) -> Box<dyn GraphExecution> {
        let payload = self.pending.lock().graph_execution.take();
        let workflow_id = payload
            .as_deref()
            .and_then(DefaultGraphExecution::workflow_id_from_payload)
            .unwrap_or_default();
        let mut execution = self.factory.create_graph_execution(&workflow_id);
        if let Some(payload) = payload {
            if let Err(e) = execution.loads(&payload) {
                tracing::warn!(error = %e, "Failed to restore graph execution, starting fresh");
            }
        }
        execution
    }

    fn build_response_coordinator(&self, graph: Arc<Graph>) -> Box<dyn ResponseCoordinator> {
        let mut coordinator = self.factory.create_response_coordinator(graph);
        if let Some(payload) = self.pending.lock().response_coordinator.take() {
            if let Err(e) = coordinator.loads(&payload) {
                tracing::warn!(error = %e, "Failed to restore response coordinator, starting fresh");
            }
        }
        coordinator
    }

    pub fn ready_queue(&self) -> MappedMutexGuard<'_, dyn ReadyQueue + 'static> {
        MutexGuard::map(self.ready_queue.lock(), |slot| {
            &mut **slot.get_or_insert_with(|| self.build_ready_queue())
        })
    }

    pub fn graph_execution(&self) -> MappedMutexGuard<'_, dyn GraphExecution + 'static> {
        MutexGuard::map(self.graph_execution.lock(), |slot| {
            &mut **slot.get_or_insert_with(|| self.build_graph_execution())
        })
    }

    /// The coordinator; needs an attached graph the first time it is built
    pub fn response_coordinator(
        &self,
    ) -> Result<MappedMutexGuard<'_, dyn ResponseCoordinator + 'static>> {
        let mut slot = self.response_coordinator.lock();
        if slot.is_none() {
            let graph = self.graph().ok_or_else(|| {
                GraphError::Configuration(
                    "Response coordinator requires an attached graph".to_string(),
                )
            })?;
            *slot = Some(self.build_response_coordinator(graph));
        }
        MutexGuard::try_map(slot, |slot| slot.as_deref_mut()).map_err(|_| {
            GraphError::State("Response coordinator is not available".to_string())
        })
    }

    // ---- snapshot ------------------------------------------------------

    /// Serialize the whole state into the versioned document
    pub fn dumps(&self) -> Result<String> {
        let counters = self.counters.lock().clone();
        let pending = {
            let pending = self.pending.lock();
            (
                pending.ready_queue.clone(),
                pending.graph_execution.clone(),
                pending.response_coordinator.clone(),
            )
        };

        let ready_queue = match self.ready_queue.lock().as_ref() {
            Some(queue) => Some(queue.dumps()?),
            None => pending.0,
        };
        let graph_execution = match self.graph_execution.lock().as_ref() {
            Some(execution) => Some(execution.dumps()?),
            None => pending.1,
        };
        let response_coordinator = match self.response_coordinator.lock().as_ref() {
            Some(coordinator) => Some(coordinator.dumps()?),
            None => pending.2,
        };

        let document = RuntimeStateDocument {
            version: SNAPSHOT_VERSION.to_string(),
            start_at: counters.start_at,
            total_tokens: counters.total_tokens,
            node_run_steps: counters.node_run_steps,
            llm_usage: counters.llm_usage,
            outputs: counters.outputs,
            variable_pool: self.variable_pool.read().clone(),
            ready_queue,
            graph_execution,
            paused_nodes: counters.paused_nodes,
            response_coordinator,
        };
        Ok(serde_json::to_string(&document)?)
    }

    /// Replace this state with a serialized one
    ///
    /// Collaborators are dropped and rebuilt from the document on next access.
    pub fn loads(&self, data: &str) -> Result<()> {
        let raw: Value = serde_json::from_str(data)?;
        match raw.get("version").and_then(Value::as_str) {
            Some(SNAPSHOT_VERSION) => {}
            Some(other) => return Err(GraphError::UnsupportedSnapshotVersion(other.to_string())),
            None => return Err(GraphError::UnsupportedSnapshotVersion("<missing>".to_string())),
        }
        let document: RuntimeStateDocument = serde_json::from_value(raw)?;

        *self.counters.lock() = Counters {
            start_at: document.start_at,
            total_tokens: document.total_tokens,
            node_run_steps: document.node_run_steps,
            llm_usage: document.llm_usage,
            outputs: document.outputs,
            paused_nodes: document.paused_nodes,
        };
        *self.variable_pool.write() = document.variable_pool;

        *self.ready_queue.lock() = None;
        *self.graph_execution.lock() = None;
        *self.response_coordinator.lock() = None;
        *self.pending.lock() = PendingPayloads {
            ready_queue: document.ready_queue,
            graph_execution: document.graph_execution,
            response_coordinator: document.response_coordinator,
        };
        Ok(())
    }

    /// Independent state for a parallel iteration item
    ///
    /// The pool is deep-copied; counters start at zero and collaborators are fresh.
    pub fn create_copy(&self) -> Self {
        let pool = self.variable_pool.read().clone();
        Self::with_factory(pool, self.factory.clone())
    }
}

impl fmt::Debug for GraphRuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = self.counters.lock();
        f.debug_struct("GraphRuntimeState")
            .field("start_at", &counters.start_at)
            .field("total_tokens", &counters.total_tokens)
            .field("node_run_steps", &counters.node_run_steps)
            .field("paused_nodes", &counters.paused_nodes)
            .field("graph_attached", &self.graph.read().is_some())
            .finish()
    }
}
