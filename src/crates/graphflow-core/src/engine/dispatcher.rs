//! The dispatch loop behind [`GraphEngine::run`](super::GraphEngine::run)
//!
//! ```text
//!            ┌──────────── ready queue ◄──────────────┐
//!            ▼                                        │
//!   dispatch (≤ max_workers) ──► worker tasks ──► node events ──► handle ──► edges
//!            ▲                                        │
//!   retry timers ─────────────────────────────────────┘
//!   commands, ping and deadline timers feed the same select loop
//! ```
//!
//! The loop ends once nothing is queued, running or waiting for a retry, or once dispatch
//! was stopped and the running set drained. The terminal event is decided from the
//! execution aggregate afterwards.

use super::branches::BranchTracker;
use super::command::{CommandReceiver, GraphEngineCommand, DEFAULT_ABORT_REASON};
use super::edges;
use super::layer::LayerSet;
use super::worker;
use crate::context::RunContext;
use crate::events::{GraphEngineEvent, NodeEventInfo};
use crate::graph::{ErrorStrategy, Graph};
use crate::node::{
    NodeContext, NodeEventSink, NodeExecutionType, NodeRunResult, NodeRunStatus,
    FAIL_BRANCH_HANDLE, SOURCE_HANDLE,
};
use crate::runtime::{GraphRuntimeState, NodeState, ReadOnlyGraphRuntimeState, ResponseCoordinator};
use crate::variables::VariablePool;
use graphflow_checkpoint::{Snapshot, SnapshotReason, SnapshotStore};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use std::time::Duration;
use tokio::time::Instant;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub(crate) struct Dispatcher {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    run_context: Arc<RunContext>,
    layers: LayerSet,
    read_only: ReadOnlyGraphRuntimeState,
    commands: Option<CommandReceiver>,
    snapshot: Option<(Arc<dyn SnapshotStore>, String)>,
    out: mpsc::Sender<GraphEngineEvent>,
    node_tx: mpsc::Sender<GraphEngineEvent>,
    node_rx: mpsc::Receiver<GraphEngineEvent>,
    retry_tx: mpsc::UnboundedSender<String>,
    retry_rx: mpsc::UnboundedReceiver<String>,
    workers: JoinSet<()>,
    running: HashMap<String, NodeEventInfo>,
    retry_waiting: usize,
    retry_infos: HashMap<String, NodeEventInfo>,
    predecessors: HashMap<String, String>,
    branches: BranchTracker,
    stop_dispatch: bool,
    last_event_at: Instant,
    deadline: Instant,
}

async fn next_command(commands: &mut Option<CommandReceiver>) -> Option<GraphEngineCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// `from + after`, or roughly thirty years ahead when that is not representable
fn instant_after(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

fn usage_tokens(result: &NodeRunResult) -> i64 {
    i64::try_from(result.llm_usage.total_tokens).unwrap_or(i64::MAX)
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        run_context: Arc<RunContext>,
        layers: LayerSet,
        commands: Option<CommandReceiver>,
        snapshot: Option<(Arc<dyn SnapshotStore>, String)>,
        out: mpsc::Sender<GraphEngineEvent>,
    ) -> Self {
        let buffer = run_context.config.event_buffer.max(1);
        let (node_tx, node_rx) = mpsc::channel(buffer);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let deadline = instant_after(now, run_context.config.max_execution_time());
        Self {
            read_only: ReadOnlyGraphRuntimeState::new(state.clone()),
            graph,
            state,
            run_context,
            layers,
            commands,
            snapshot,
            out,
            node_tx,
            node_rx,
            retry_tx,
            retry_rx,
            workers: JoinSet::new(),
            running: HashMap::new(),
            retry_waiting: 0,
            retry_infos: HashMap::new(),
            predecessors: HashMap::new(),
            branches: BranchTracker::default(),
            stop_dispatch: false,
            last_event_at: now,
            deadline,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(
            workflow_id = %self.run_context.workflow_id,
            root = %self.graph.root_node_id(),
            "Graph run starting"
        );
        self.start();
        self.layers.on_graph_start(&self.read_only);
        self.emit(GraphEngineEvent::GraphRunStarted).await;

        loop {
            if !self.stop_dispatch {
                self.dispatch_ready().await;
            }
            if self.is_idle() {
                break;
            }

            let ping_at =
                instant_after(self.last_event_at, self.run_context.config.ping_interval());
            let deadline = self.deadline;
            tokio::select! {
                Some(event) = self.node_rx.recv() => self.handle_node_event(event).await,
                Some(node_id) = self.retry_rx.recv() => self.redispatch(node_id).await,
                command = next_command(&mut self.commands) => match command {
                    Some(command) => self.handle_command(command),
                    None => self.commands = None,
                },
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Node worker task failed");
                    }
                }
                _ = tokio::time::sleep_until(ping_at) => self.emit(GraphEngineEvent::Ping).await,
                _ = tokio::time::sleep_until(deadline), if !self.stop_dispatch => {
                    let limit = self.run_context.config.max_execution_time_secs;
                    self.fail_run(format!("Max execution time {}s reached.", limit));
                }
            }
        }

        self.finish().await;
    }

    fn start(&mut self) {
        let resumed = {
            let mut execution = self.state.graph_execution();
            if execution.started() {
                execution.resume();
                true
            } else {
                execution.start();
                false
            }
        };

        if resumed {
            let paused = self.state.consume_paused_nodes();
            tracing::info!(paused = ?paused, "Resuming graph run");
            let mut queue = self.state.ready_queue();
            for node_id in paused {
                queue.put(node_id);
            }
        } else {
            let root = self.graph.root_node_id().to_string();
            self.state
                .graph_execution()
                .set_node_state(&root, NodeState::Taken);
            self.state.ready_queue().put(root);
        }
    }

    fn is_idle(&self) -> bool {
        if self.stop_dispatch {
            return self.running.is_empty();
        }
        self.running.is_empty() && self.retry_waiting == 0 && self.state.ready_queue().is_empty()
    }

    async fn dispatch_ready(&mut self) {
        let max_workers = self.run_context.config.max_workers.max(1);
        while self.running.len() < max_workers {
            let Some(node_id) = self.state.ready_queue().get() else {
                break;
            };
            let max_steps = self.run_context.config.max_execution_steps;
            if self.state.node_run_steps() >= max_steps {
                self.fail_run(format!("Max steps {} reached.", max_steps));
                return;
            }
            self.state.increment_node_run_steps();
            self.launch(node_id, None).await;
        }
    }

    async fn launch(&mut self, node_id: String, retry_info: Option<NodeEventInfo>) {
        let Some((node, node_type, title)) = self
            .graph
            .node(&node_id)
            .map(|n| (n.node.clone(), n.node_type.clone(), n.title.clone()))
        else {
            tracing::warn!(node_id = %node_id, "Queued node is not in the graph");
            return;
        };

        let info = match retry_info {
            Some(info) => info,
            None => {
                let mut info = NodeEventInfo::new(&node_id, node_type, title);
                info.predecessor_node_id = self.predecessors.get(&node_id).cloned();
                self.branches.annotate(&node_id, &mut info);
                let execution_id = info.id.clone();
                self.with_coordinator(|coordinator, _| {
                    coordinator.track_node_execution(&node_id, &execution_id);
                    Vec::new()
                });
                self.emit(GraphEngineEvent::NodeRunStarted { info: info.clone() })
                    .await;
                info
            }
        };

        tracing::debug!(node_id = %node_id, execution_id = %info.id, "Dispatching node");
        self.running.insert(node_id, info.clone());
        let ctx = NodeContext {
            info: info.clone(),
            runtime_state: self.state.clone(),
            run_context: self.run_context.clone(),
            events: NodeEventSink::new(self.node_tx.clone(), info),
        };
        self.workers
            .spawn(worker::execute(node, ctx, self.node_tx.clone()));
    }

    async fn redispatch(&mut self, node_id: String) {
        self.retry_waiting = self.retry_waiting.saturating_sub(1);
        let info = self.retry_infos.remove(&node_id);
        if self.stop_dispatch {
            return;
        }
        self.launch(node_id, info).await;
    }

    fn with_coordinator<F>(&self, f: F) -> Vec<GraphEngineEvent>
    where
        F: FnOnce(&mut (dyn ResponseCoordinator + 'static), &VariablePool) -> Vec<GraphEngineEvent>,
    {
        let pool = self.state.variable_pool();
        match self.state.response_coordinator() {
            Ok(mut coordinator) => f(&mut *coordinator, &*pool),
            Err(e) => {
                tracing::error!(error = %e, "Response coordinator unavailable");
                Vec::new()
            }
        }
    }

    fn is_running(&self, info: &NodeEventInfo) -> bool {
        self.running
            .get(&info.node_id)
            .map_or(false, |running| running.id == info.id)
    }

    async fn handle_node_event(&mut self, event: GraphEngineEvent) {
        if event.node_info().map_or(false, NodeEventInfo::is_nested) {
            self.emit(event).await;
            return;
        }

        match event {
            GraphEngineEvent::NodeRunStreamChunk { .. } => {
                let chunks = self.with_coordinator(|c, pool| c.intercept_event(&event, pool));
                self.emit_all(chunks).await;
            }
            GraphEngineEvent::NodeRunSucceeded { info, .. }
            | GraphEngineEvent::NodeRunFailed { info, .. }
            | GraphEngineEvent::NodeRunPaused { info, .. }
                if !self.is_running(&info) =>
            {
                tracing::debug!(node_id = %info.node_id, "Completion of an unknown execution dropped");
            }
            GraphEngineEvent::NodeRunSucceeded { info, result } => {
                self.running.remove(&info.node_id);
                self.retry_infos.remove(&info.node_id);
                self.complete_node(info, result, None).await;
            }
            GraphEngineEvent::NodeRunFailed { info, error, result } => {
                self.running.remove(&info.node_id);
                self.handle_failure(info, error, result).await;
            }
            GraphEngineEvent::NodeRunPaused { info, result } => {
                self.running.remove(&info.node_id);
                tracing::info!(node_id = %info.node_id, "Node paused");
                self.state.register_paused_node(info.node_id.clone());
                self.emit(GraphEngineEvent::NodeRunPaused { info, result })
                    .await;
            }
            // container progress events pass through unchanged
            other => self.emit(other).await,
        }
    }

    /// Store outputs, take edges and report a finished node
    ///
    /// `exception` is set when an error strategy absorbed a failure.
    async fn complete_node(
        &mut self,
        info: NodeEventInfo,
        result: NodeRunResult,
        exception: Option<String>,
    ) {
        let node_id = info.node_id.clone();
        let Some(graph_node) = self.graph.node(&node_id) else {
            return;
        };
        let execution_type = graph_node.execution_type;

        {
            let mut pool = self.state.variable_pool_mut();
            for (key, value) in &result.outputs {
                if let Err(e) = pool.add(&[node_id.as_str(), key.as_str()], value.clone()) {
                    tracing::warn!(node_id = %node_id, key = %key, error = %e, "Output not stored");
                }
            }
        }

        if let Err(e) = self.state.add_tokens(usage_tokens(&result)) {
            tracing::warn!(error = %e, "Token usage not recorded");
        }
        if !result.llm_usage.is_empty() {
            self.state.add_llm_usage(&result.llm_usage);
        }

        if execution_type == NodeExecutionType::Response {
            self.merge_response_outputs(&result.outputs);
        }

        let event = match exception {
            Some(error) => GraphEngineEvent::NodeRunException {
                info,
                error,
                result: result.clone(),
            },
            None => GraphEngineEvent::NodeRunSucceeded {
                info,
                result: result.clone(),
            },
        };
        let mut chunks = self.with_coordinator(|c, pool| c.intercept_event(&event, pool));

        let handle = result.edge_source_handle.as_deref();
        let outcome = {
            let mut execution = self.state.graph_execution();
            edges::process_node_success(&self.graph, &mut *execution, &node_id, handle)
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.emit_all(chunks).await;
                let error = e.to_string();
                let branch_events = self.branches.on_failure(&node_id, &error);
                self.emit_all(branch_events).await;
                self.fail_run(error);
                return;
            }
        };

        for edge_id in &outcome.taken_edges {
            chunks.extend(self.with_coordinator(|c, pool| c.on_edge_taken(edge_id, pool)));
        }
        for skipped in &outcome.skipped_nodes {
            self.with_coordinator(|c, _| {
                c.on_node_skipped(skipped);
                Vec::new()
            });
        }

        let branch_started = self
            .branches
            .on_edges_taken(&self.graph, &node_id, &outcome.taken_heads);
        self.emit_all(chunks).await;
        self.emit(event).await;
        self.emit_all(branch_started).await;

        for ready in outcome.ready_nodes {
            self.predecessors.insert(ready.clone(), node_id.clone());
            self.branches.on_enqueue(&ready);
            self.state.ready_queue().put(ready);
        }
        let branch_done = self.branches.on_complete(&node_id);
        self.emit_all(branch_done).await;
    }

    fn merge_response_outputs(&self, outputs: &Map<String, Value>) {
        let mut merged = self.state.outputs();
        for (key, value) in outputs {
            if key == "answer" {
                let previous = merged
                    .get("answer")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let addition = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                merged.insert(key.clone(), Value::String(previous + &addition));
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        self.state.set_outputs(merged);
    }

    async fn handle_failure(&mut self, info: NodeEventInfo, error: String, result: NodeRunResult) {
        let node_id = info.node_id.clone();
        let Some(graph_node) = self.graph.node(&node_id) else {
            return;
        };
        let retry_config = graph_node.data.retry_config.clone();
        let error_strategy = graph_node.data.error_strategy;
        let default_outputs = graph_node.data.default_outputs();

        let retry_count = self.state.graph_execution().retry_count(&node_id);
        if !self.stop_dispatch && retry_config.allows_retry(retry_count) {
            let retry_index = self.state.graph_execution().increment_retry(&node_id);
            let delay = retry_config
                .to_policy()
                .calculate_delay(retry_index.saturating_sub(1) as usize);
            tracing::info!(
                node_id = %node_id,
                retry_index,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying node"
            );
            self.emit(GraphEngineEvent::NodeRunRetry {
                info: info.clone(),
                error,
                retry_index,
                result,
            })
            .await;

            self.retry_infos.insert(node_id.clone(), info);
            self.retry_waiting += 1;
            let tx = self.retry_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(node_id);
            });
            return;
        }
        self.retry_infos.remove(&node_id);

        let error_type = result
            .error_type
            .clone()
            .unwrap_or_else(|| "NodeExecutionError".to_string());
        match error_strategy {
            Some(ErrorStrategy::FailBranch) => {
                let handled = NodeRunResult {
                    status: NodeRunStatus::Exception,
                    outputs: Map::new(),
                    ..result
                }
                .with_output("error_message", error.clone())
                .with_output("error_type", error_type)
                .with_edge_source_handle(FAIL_BRANCH_HANDLE);
                self.state.graph_execution().record_exception();
                self.complete_node(info, handled, Some(error)).await;
            }
            Some(ErrorStrategy::DefaultValue) => {
                let handled = NodeRunResult {
                    status: NodeRunStatus::Exception,
                    outputs: default_outputs,
                    ..result
                }
                .with_output("error_message", error.clone())
                .with_output("error_type", error_type)
                .with_edge_source_handle(SOURCE_HANDLE);
                self.state.graph_execution().record_exception();
                self.complete_node(info, handled, Some(error)).await;
            }
            None => {
                tracing::warn!(node_id = %node_id, error = %error, "Node failed");
                self.emit(GraphEngineEvent::NodeRunFailed {
                    info,
                    error: error.clone(),
                    result,
                })
                .await;
                let branch_events = self.branches.on_failure(&node_id, &error);
                self.emit_all(branch_events).await;
                self.fail_run(error);
            }
        }
    }

    fn handle_command(&mut self, command: GraphEngineCommand) {
        match command {
            GraphEngineCommand::Abort { reason } => {
                let reason = reason.unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string());
                tracing::info!(reason = %reason, "Abort command received");
                self.state.graph_execution().abort(&reason);
                self.stop();
            }
        }
    }

    fn fail_run(&mut self, error: String) {
        tracing::error!(error = %error, "Graph run failed");
        self.state.graph_execution().fail(&error);
        self.stop();
    }

    /// No new dispatches; running nodes drain to completion
    fn stop(&mut self) {
        self.stop_dispatch = true;
    }

    async fn finish(&mut self) {
        let (error, aborted, abort_reason, exceptions_count) = {
            let execution = self.state.graph_execution();
            (
                execution.error().map(str::to_string),
                execution.aborted(),
                execution.abort_reason().map(str::to_string),
                execution.exceptions_count(),
            )
        };
        let paused_nodes = self.state.paused_nodes();
        let outputs = self.state.outputs();

        let (event, reason) = if let Some(error) = error.clone() {
            (
                GraphEngineEvent::GraphRunFailed {
                    error,
                    exceptions_count,
                },
                SnapshotReason::Failed,
            )
        } else if aborted {
            (
                GraphEngineEvent::GraphRunAborted {
                    reason: abort_reason,
                    outputs,
                },
                SnapshotReason::Aborted,
            )
        } else if !paused_nodes.is_empty() {
            self.state.graph_execution().pause();
            (
                GraphEngineEvent::GraphRunPaused {
                    paused_nodes,
                    outputs,
                },
                SnapshotReason::Paused,
            )
        } else if exceptions_count > 0 {
            (
                GraphEngineEvent::GraphRunPartialSucceeded {
                    exceptions_count,
                    outputs,
                },
                SnapshotReason::Completed,
            )
        } else {
            (
                GraphEngineEvent::GraphRunSucceeded { outputs },
                SnapshotReason::Completed,
            )
        };

        if reason != SnapshotReason::Paused {
            self.state.graph_execution().complete();
        }
        self.save_snapshot(reason).await;
        self.layers.on_graph_end(error.as_deref(), &self.read_only);

        tracing::info!(
            event = event.name(),
            steps = self.state.node_run_steps(),
            total_tokens = self.state.total_tokens(),
            "Graph run finished"
        );
        self.emit(event).await;
    }

    async fn save_snapshot(&self, reason: SnapshotReason) {
        let Some((store, run_id)) = &self.snapshot else {
            return;
        };
        let data = match self.state.dumps() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Runtime state not serializable");
                return;
            }
        };
        let snapshot = Snapshot::new(run_id.clone(), reason, self.state.node_run_steps(), data);
        if let Err(e) = store.put(snapshot).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to store snapshot");
        }
    }

    async fn emit_all(&mut self, events: Vec<GraphEngineEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }

    async fn emit(&mut self, event: GraphEngineEvent) {
        self.last_event_at = Instant::now();
        self.layers.on_event(&event, &self.read_only);
        if self.out.send(event).await.is_err() {
            tracing::debug!("Event consumer dropped");
        }
    }
}
