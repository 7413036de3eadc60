//! Engine events to run records and stream responses
//!
//! [`WorkflowCycleManager`] consumes one [`GraphEngineEvent`] at a time. Each event updates the
//! run or node-execution records it concerns and yields at most one [`StreamResponse`].
//!
//! ```text
//! GraphRunStarted        ─► WorkflowRun(running)            ─► workflow_started
//! NodeRunStarted         ─► NodeExecution(running)          ─► node_started
//! NodeRunRetry           ─► NodeExecution(retry), new row   ─► node_retry
//! NodeRunSucceeded/...   ─► NodeExecution(final) + drafts   ─► node_finished
//! Iteration*/Loop*       ─► round bookkeeping               ─► iteration_*/loop_*
//! GraphRun{terminal}     ─► WorkflowRun(final) + app log    ─► workflow_finished
//! ```
//!
//! Persistence failures are logged and never interrupt the run.

use crate::entities::{
    is_container_type, seconds_between, DraftVariableKey, NodeExecution, NodeExecutionStatus,
    WorkflowAppLog, WorkflowRun, WorkflowRunStatus, WorkflowRunTriggeredFrom,
};
use crate::repository::Repositories;
use crate::responses::{
    ContainerCompletedData, ContainerNextData, ContainerStartData, NodeFinishData,
    NodeRetryData, NodeStartData, ParallelBranchData, Placement, ResponseEvent,
    StreamResponse, TextChunkData, WorkflowFinishData, WorkflowStartData,
};
use chrono::{DateTime, Utc};
use graphflow_core::{
    GraphEngineEvent, GraphRuntimeState, NodeEventInfo, NodeRunResult, ParallelBranchInfo,
    RunContext,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Error recorded when the engine stream ends without a terminal event
pub const MISSING_TERMINAL_ERROR: &str = "Workflow run ended without a terminal event";

const STOPPED_ERROR: &str = "Workflow run stopped.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Iteration,
    Loop,
}

impl ContainerKind {
    fn duration_key(&self) -> &'static str {
        match self {
            Self::Iteration => "iteration_duration_map",
            Self::Loop => "loop_duration_map",
        }
    }
}

/// Round timing of one running iteration or loop
#[derive(Debug)]
struct ContainerProgress {
    open_rounds: HashMap<usize, Instant>,
    durations: Map<String, Value>,
}

impl ContainerProgress {
    fn new() -> Self {
        Self {
            open_rounds: HashMap::new(),
            durations: Map::new(),
        }
    }

    /// Open round `index` and close the one before it
    fn advance(&mut self, index: usize) -> Option<f64> {
        let previous = index
            .checked_sub(1)
            .and_then(|prev| self.close_round(prev));
        self.open_rounds.insert(index, Instant::now());
        previous
    }

    fn close_round(&mut self, index: usize) -> Option<f64> {
        let started = self.open_rounds.remove(&index)?;
        let seconds = started.elapsed().as_secs_f64();
        self.durations.insert(index.to_string(), json!(seconds));
        Some(seconds)
    }

    fn close(mut self) -> Map<String, Value> {
        let open: Vec<usize> = self.open_rounds.keys().copied().collect();
        for index in open {
            self.close_round(index);
        }
        self.durations
    }
}

/// Run-scoped totals and bookkeeping
#[derive(Debug, Default)]
struct RunAccumulator {
    started: Option<Instant>,
    total_tokens: u64,
    total_steps: u64,
    exceptions_count: u64,
    node_index: u64,
    containers: HashMap<String, ContainerProgress>,
    /// Round durations of finished containers, waiting for their node record
    finished_durations: HashMap<String, (ContainerKind, Map<String, Value>)>,
}

impl RunAccumulator {
    fn next_index(&mut self) -> u64 {
        self.node_index += 1;
        self.node_index
    }

    fn elapsed(&self) -> f64 {
        self.started
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

struct RunEnd {
    status: WorkflowRunStatus,
    outputs: Map<String, Value>,
    error: Option<String>,
    exceptions_count: u64,
    paused_nodes: Vec<String>,
}

/// Reconciles one run's engine events with its durable records
pub struct WorkflowCycleManager {
    task_id: String,
    run_id: String,
    run_context: Arc<RunContext>,
    repositories: Repositories,
    inputs: Map<String, Value>,
    runtime_state: Option<Arc<GraphRuntimeState>>,
    run: Option<WorkflowRun>,
    node_executions: HashMap<String, NodeExecution>,
    accumulator: RunAccumulator,
    draft_writes: JoinSet<()>,
    app_log_written: bool,
}

impl WorkflowCycleManager {
    pub fn new(
        run_context: Arc<RunContext>,
        repositories: Repositories,
        inputs: Map<String, Value>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            run_id: Uuid::new_v4().to_string(),
            run_context,
            repositories,
            inputs,
            runtime_state: None,
            run: None,
            node_executions: HashMap::new(),
            accumulator: RunAccumulator::default(),
            draft_writes: JoinSet::new(),
            app_log_written: false,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Take run totals from the engine's state instead of summing node results
    pub fn with_runtime_state(mut self, state: Arc<GraphRuntimeState>) -> Self {
        self.runtime_state = Some(state);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current run record, once the run has started
    pub fn workflow_run(&self) -> Option<&WorkflowRun> {
        self.run.as_ref()
    }

    /// Apply one engine event
    pub async fn handle_event(&mut self, event: GraphEngineEvent) -> Option<StreamResponse> {
        match event {
            GraphEngineEvent::GraphRunStarted => {
                let run = self.ensure_run().await;
                Some(self.respond(ResponseEvent::WorkflowStarted(WorkflowStartData::from(&run))))
            }
            GraphEngineEvent::GraphRunSucceeded { outputs } => Some(
                self.finish_run(RunEnd {
                    status: WorkflowRunStatus::Succeeded,
                    outputs,
                    error: None,
                    exceptions_count: 0,
                    paused_nodes: Vec::new(),
                })
                .await,
            ),
            GraphEngineEvent::GraphRunPartialSucceeded {
                exceptions_count,
                outputs,
            } => Some(
                self.finish_run(RunEnd {
                    status: WorkflowRunStatus::PartialSucceeded,
                    outputs,
                    error: None,
                    exceptions_count,
                    paused_nodes: Vec::new(),
                })
                .await,
            ),
            GraphEngineEvent::GraphRunFailed {
                error,
                exceptions_count,
            } => Some(self.fail_run(error, exceptions_count).await),
            GraphEngineEvent::GraphRunAborted { reason, outputs } => {
                let exceptions_count = self.accumulator.exceptions_count;
                Some(
                    self.finish_run(RunEnd {
                        status: WorkflowRunStatus::Stopped,
                        outputs,
                        error: Some(reason.unwrap_or_else(|| STOPPED_ERROR.to_string())),
                        exceptions_count,
                        paused_nodes: Vec::new(),
                    })
                    .await,
                )
            }
            GraphEngineEvent::GraphRunPaused {
                paused_nodes,
                outputs,
            } => {
                let exceptions_count = self.accumulator.exceptions_count;
                Some(
                    self.finish_run(RunEnd {
                        status: WorkflowRunStatus::Paused,
                        outputs,
                        error: None,
                        exceptions_count,
                        paused_nodes,
                    })
                    .await,
                )
            }
            GraphEngineEvent::NodeRunStarted { info } => self.node_started(&info).await,
            GraphEngineEvent::NodeRunStreamChunk {
                selector, chunk, ..
            } => Some(self.respond(ResponseEvent::TextChunk(TextChunkData {
                text: chunk,
                from_variable_selector: selector,
            }))),
            GraphEngineEvent::NodeRunSucceeded { info, result } => {
                self.node_finished(&info, &result, NodeExecutionStatus::Succeeded, None)
                    .await
            }
            GraphEngineEvent::NodeRunFailed {
                info,
                error,
                result,
            } => {
                self.node_finished(&info, &result, NodeExecutionStatus::Failed, Some(error))
                    .await
            }
            GraphEngineEvent::NodeRunException {
                info,
                error,
                result,
            } => {
                if !info.is_nested() {
                    self.accumulator.exceptions_count += 1;
                }
                self.node_finished(&info, &result, NodeExecutionStatus::Exception, Some(error))
                    .await
            }
            GraphEngineEvent::NodeRunRetry {
                info,
                error,
                retry_index,
                result,
            } => self.node_retried(&info, error, retry_index, &result).await,
            GraphEngineEvent::NodeRunPaused { info, result } => {
                self.node_finished(&info, &result, NodeExecutionStatus::Paused, None)
                    .await
            }
            GraphEngineEvent::IterationStarted {
                info,
                inputs,
                metadata,
            } => Some(self.container_started(ContainerKind::Iteration, &info, inputs, metadata)),
            GraphEngineEvent::IterationNext {
                info,
                index,
                pre_iteration_output,
            } => Some(self.container_next(
                ContainerKind::Iteration,
                &info,
                index,
                pre_iteration_output,
            )),
            GraphEngineEvent::IterationSucceeded {
                info,
                inputs,
                outputs,
                metadata,
                steps,
            } => Some(self.container_completed(
                ContainerKind::Iteration,
                &info,
                inputs,
                outputs,
                &metadata,
                steps,
                None,
            )),
            GraphEngineEvent::IterationFailed {
                info,
                inputs,
                outputs,
                metadata,
                steps,
                error,
            } => Some(self.container_completed(
                ContainerKind::Iteration,
                &info,
                inputs,
                outputs,
                &metadata,
                steps,
                Some(error),
            )),
            GraphEngineEvent::LoopStarted {
                info,
                inputs,
                metadata,
            } => Some(self.container_started(ContainerKind::Loop, &info, inputs, metadata)),
            GraphEngineEvent::LoopNext {
                info,
                index,
                pre_loop_output,
            } => Some(self.container_next(ContainerKind::Loop, &info, index, pre_loop_output)),
            GraphEngineEvent::LoopSucceeded {
                info,
                inputs,
                outputs,
                metadata,
                steps,
            } => Some(self.container_completed(
                ContainerKind::Loop,
                &info,
                inputs,
                outputs,
                &metadata,
                steps,
                None,
            )),
            GraphEngineEvent::LoopFailed {
                info,
                inputs,
                outputs,
                metadata,
                steps,
                error,
            } => Some(self.container_completed(
                ContainerKind::Loop,
                &info,
                inputs,
                outputs,
                &metadata,
                steps,
                Some(error),
            )),
            GraphEngineEvent::ParallelBranchRunStarted { branch } => {
                Some(self.respond(ResponseEvent::ParallelBranchStarted(branch_data(
                    branch, None, None,
                ))))
            }
            GraphEngineEvent::ParallelBranchRunSucceeded { branch } => {
                Some(self.respond(ResponseEvent::ParallelBranchFinished(branch_data(
                    branch,
                    Some("succeeded"),
                    None,
                ))))
            }
            GraphEngineEvent::ParallelBranchRunFailed { branch, error } => {
                Some(self.respond(ResponseEvent::ParallelBranchFinished(branch_data(
                    branch,
                    Some("failed"),
                    Some(error),
                ))))
            }
            GraphEngineEvent::Ping => Some(self.respond(ResponseEvent::Ping)),
        }
    }

    /// Close a run whose event stream ended early
    pub async fn finish_without_terminal(&mut self) -> StreamResponse {
        tracing::error!(run_id = %self.run_id, "Engine stream ended without a terminal event");
        let exceptions_count = self.accumulator.exceptions_count;
        self.fail_run(MISSING_TERMINAL_ERROR.to_string(), exceptions_count)
            .await
    }

    /// Wait for spawned draft-variable writes
    pub async fn flush(&mut self) {
        while let Some(joined) = self.draft_writes.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(run_id = %self.run_id, error = %e, "Draft variable write task failed");
            }
        }
    }

    fn respond(&self, event: ResponseEvent) -> StreamResponse {
        StreamResponse {
            task_id: self.task_id.clone(),
            workflow_run_id: self.run_id.clone(),
            event,
        }
    }

    async fn ensure_run(&mut self) -> WorkflowRun {
        if let Some(run) = &self.run {
            return run.clone();
        }

        let ctx = &self.run_context;
        let sequence_number = match self
            .repositories
            .workflow_runs
            .max_sequence_number(&ctx.tenant_id, &ctx.app_id)
            .await
        {
            Ok(max) => max + 1,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "Failed to read run sequence");
                1
            }
        };

        let run = WorkflowRun {
            id: self.run_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            app_id: ctx.app_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            sequence_number,
            triggered_from: WorkflowRunTriggeredFrom::from(ctx.invoke_from),
            inputs: self.inputs.clone(),
            status: WorkflowRunStatus::Running,
            outputs: Map::new(),
            error: None,
            elapsed_time: 0.0,
            total_tokens: 0,
            total_steps: 0,
            exceptions_count: 0,
            created_by: ctx.user_id.clone(),
            created_at: Utc::now(),
            finished_at: None,
        };
        tracing::info!(
            run_id = %run.id,
            workflow_id = %run.workflow_id,
            sequence_number = run.sequence_number,
            "Workflow run started"
        );

        self.accumulator.started = Some(Instant::now());
        self.save_run(&run).await;
        self.run = Some(run.clone());
        run
    }

    async fn fail_run(&mut self, error: String, exceptions_count: u64) -> StreamResponse {
        self.finish_run(RunEnd {
            status: WorkflowRunStatus::Failed,
            outputs: Map::new(),
            error: Some(error),
            exceptions_count,
            paused_nodes: Vec::new(),
        })
        .await
    }

    async fn finish_run(&mut self, end: RunEnd) -> StreamResponse {
        let mut run = self.ensure_run().await;

        if matches!(
            end.status,
            WorkflowRunStatus::Failed | WorkflowRunStatus::Stopped
        ) {
            let error = end.error.clone().unwrap_or_default();
            self.fail_running_nodes(&error).await;
        }

        let (total_tokens, total_steps) = match &self.runtime_state {
            Some(state) => (state.total_tokens(), state.node_run_steps()),
            None => (self.accumulator.total_tokens, self.accumulator.total_steps),
        };

        run.status = end.status;
        run.outputs = end.outputs;
        run.error = end.error;
        run.exceptions_count = end.exceptions_count;
        run.total_tokens = total_tokens;
        run.total_steps = total_steps;
        run.elapsed_time = self.accumulator.elapsed();
        run.finished_at = Some(Utc::now());

        match run.status {
            WorkflowRunStatus::Failed | WorkflowRunStatus::Stopped => tracing::error!(
                run_id = %run.id,
                status = %run.status,
                error = run.error.as_deref().unwrap_or_default(),
                "Workflow run ended"
            ),
            _ => tracing::info!(
                run_id = %run.id,
                status = %run.status,
                total_tokens = run.total_tokens,
                total_steps = run.total_steps,
                "Workflow run ended"
            ),
        }

        self.save_run(&run).await;
        if run.status.is_finished() {
            self.write_app_log(&run).await;
        }

        let data = WorkflowFinishData::from_run(&run, end.paused_nodes);
        self.run = Some(run);
        self.respond(ResponseEvent::WorkflowFinished(data))
    }

    async fn save_run(&self, run: &WorkflowRun) {
        if let Err(e) = self.repositories.workflow_runs.save(run).await {
            tracing::warn!(run_id = %run.id, error = %e, "Failed to save workflow run");
        }
    }

    async fn save_node(&self, record: &NodeExecution) {
        if let Err(e) = self.repositories.node_executions.save(record).await {
            tracing::warn!(
                run_id = %self.run_id,
                node_id = %record.node_id,
                error = %e,
                "Failed to save node execution"
            );
        }
    }

    async fn write_app_log(&mut self, run: &WorkflowRun) {
        if self.app_log_written || !self.run_context.invoke_from.is_external() {
            return;
        }
        self.app_log_written = true;

        let log = WorkflowAppLog {
            id: Uuid::new_v4().to_string(),
            tenant_id: run.tenant_id.clone(),
            app_id: run.app_id.clone(),
            workflow_id: run.workflow_id.clone(),
            workflow_run_id: run.id.clone(),
            created_from: self.run_context.invoke_from,
            created_by: run.created_by.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.repositories.app_logs.create(&log).await {
            tracing::warn!(run_id = %run.id, error = %e, "Failed to write app log");
        }
    }

    async fn fail_running_nodes(&mut self, error: &str) {
        let now = Utc::now();
        let mut failed = Vec::new();
        for record in self.node_executions.values_mut() {
            if record.status == NodeExecutionStatus::Running {
                record.error = Some(error.to_string());
                record.finish(NodeExecutionStatus::Failed, now);
                failed.push(record.clone());
            }
        }
        for record in &failed {
            self.save_node(record).await;
        }
    }

    async fn node_started(&mut self, info: &NodeEventInfo) -> Option<StreamResponse> {
        let index = self.accumulator.next_index();
        if !info.is_nested() {
            self.accumulator.total_steps += 1;
        }

        let record = NodeExecution::running(&self.run_id, index, info);
        tracing::debug!(
            node_id = %record.node_id,
            execution_id = %record.node_execution_id,
            index,
            "Node execution started"
        );
        self.save_node(&record).await;

        let response = (!record.is_container()).then(|| {
            self.respond(ResponseEvent::NodeStarted(NodeStartData::new(
                &record,
                Placement::from(info),
            )))
        });
        self.node_executions.insert(info.id.clone(), record);
        response
    }

    fn take_record(&mut self, info: &NodeEventInfo) -> NodeExecution {
        match self.node_executions.remove(&info.id) {
            Some(record) => record,
            None => {
                tracing::warn!(
                    node_id = %info.node_id,
                    execution_id = %info.id,
                    "Node finished without a start record"
                );
                let index = self.accumulator.next_index();
                NodeExecution::running(&self.run_id, index, info)
            }
        }
    }

    async fn node_finished(
        &mut self,
        info: &NodeEventInfo,
        result: &NodeRunResult,
        status: NodeExecutionStatus,
        error: Option<String>,
    ) -> Option<StreamResponse> {
        let mut record = self.take_record(info);
        record.inputs = result.inputs.clone();
        record.process_data = result.process_data.clone();
        record.outputs = result.outputs.clone();
        record.error = error.or_else(|| result.error.clone());
        record
            .execution_metadata
            .merge_reported(&result.metadata, result.llm_usage.total_tokens);
        if let Some((kind, durations)) = self.accumulator.finished_durations.remove(&info.id) {
            record
                .execution_metadata
                .extra
                .insert(kind.duration_key().to_string(), Value::Object(durations));
        }
        record.finish(status, Utc::now());
        self.accumulator.total_tokens += result.llm_usage.total_tokens;

        tracing::debug!(
            node_id = %record.node_id,
            execution_id = %record.node_execution_id,
            status = %record.status,
            "Node execution finished"
        );
        self.save_node(&record).await;

        if matches!(
            status,
            NodeExecutionStatus::Succeeded | NodeExecutionStatus::Exception
        ) {
            self.save_draft_variables(info, result);
        }

        (!record.is_container()).then(|| {
            self.respond(ResponseEvent::NodeFinished(NodeFinishData::new(
                &record,
                Placement::from(info),
            )))
        })
    }

    async fn node_retried(
        &mut self,
        info: &NodeEventInfo,
        error: String,
        retry_index: u32,
        result: &NodeRunResult,
    ) -> Option<StreamResponse> {
        let index = match self.node_executions.get(&info.id) {
            Some(record) => record.index,
            None => self.accumulator.next_index(),
        };

        let mut record = NodeExecution::running(&self.run_id, index, info);
        record.inputs = result.inputs.clone();
        record.process_data = result.process_data.clone();
        record.outputs = result.outputs.clone();
        record.error = Some(error);
        record
            .execution_metadata
            .merge_reported(&result.metadata, result.llm_usage.total_tokens);
        record.finish(NodeExecutionStatus::Retry, Utc::now());

        tracing::debug!(
            node_id = %record.node_id,
            execution_id = %record.node_execution_id,
            retry_index,
            "Node execution retried"
        );
        self.save_node(&record).await;

        (!record.is_container()).then(|| {
            self.respond(ResponseEvent::NodeRetry(NodeRetryData {
                node: NodeFinishData::new(&record, Placement::from(info)),
                retry_index,
            }))
        })
    }

    fn save_draft_variables(&mut self, info: &NodeEventInfo, result: &NodeRunResult) {
        let Some(sink) = self.repositories.draft_variables.clone() else {
            return;
        };
        let key = DraftVariableKey {
            app_id: self.run_context.app_id.clone(),
            node_id: info.node_id.clone(),
            node_type: info.node_type.clone(),
            node_execution_id: info.id.clone(),
            enclosing_node_id: info
                .in_iteration_id
                .clone()
                .or_else(|| info.in_loop_id.clone()),
        };
        let process_data = result.process_data.clone();
        let outputs = result.outputs.clone();
        self.draft_writes.spawn(async move {
            let node_id = key.node_id.clone();
            if let Err(e) = sink.save(key, process_data, outputs).await {
                tracing::warn!(node_id = %node_id, error = %e, "Failed to save draft variables");
            }
        });
    }

    fn container_started(
        &mut self,
        kind: ContainerKind,
        info: &NodeEventInfo,
        inputs: Map<String, Value>,
        metadata: Map<String, Value>,
    ) -> StreamResponse {
        self.accumulator
            .containers
            .insert(info.id.clone(), ContainerProgress::new());

        let data = ContainerStartData {
            id: info.id.clone(),
            node_id: info.node_id.clone(),
            node_type: info.node_type.clone(),
            title: info.node_title.clone(),
            created_at: Utc::now().timestamp(),
            inputs,
            metadata,
            placement: Placement::from(info),
        };
        self.respond(match kind {
            ContainerKind::Iteration => ResponseEvent::IterationStarted(data),
            ContainerKind::Loop => ResponseEvent::LoopStarted(data),
        })
    }

    fn container_next(
        &mut self,
        kind: ContainerKind,
        info: &NodeEventInfo,
        index: usize,
        pre_output: Option<Value>,
    ) -> StreamResponse {
        let duration = self
            .accumulator
            .containers
            .entry(info.id.clone())
            .or_insert_with(ContainerProgress::new)
            .advance(index);

        let data = ContainerNextData {
            id: info.id.clone(),
            node_id: info.node_id.clone(),
            node_type: info.node_type.clone(),
            title: info.node_title.clone(),
            index,
            pre_output,
            created_at: Utc::now().timestamp(),
            duration,
            placement: Placement::from(info),
        };
        self.respond(match kind {
            ContainerKind::Iteration => ResponseEvent::IterationNext(data),
            ContainerKind::Loop => ResponseEvent::LoopNext(data),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn container_completed(
        &mut self,
        kind: ContainerKind,
        info: &NodeEventInfo,
        inputs: Map<String, Value>,
        outputs: Map<String, Value>,
        metadata: &Map<String, Value>,
        steps: usize,
        error: Option<String>,
    ) -> StreamResponse {
        let durations = self
            .accumulator
            .containers
            .remove(&info.id)
            .map(ContainerProgress::close)
            .unwrap_or_default();
        self.accumulator
            .finished_durations
            .insert(info.id.clone(), (kind, durations.clone()));

        let finished_at: DateTime<Utc> = Utc::now();
        let data = ContainerCompletedData {
            id: info.id.clone(),
            node_id: info.node_id.clone(),
            node_type: info.node_type.clone(),
            title: info.node_title.clone(),
            inputs,
            outputs,
            status: if error.is_some() { "failed" } else { "succeeded" }.to_string(),
            error,
            elapsed_time: seconds_between(info.start_at, finished_at),
            total_tokens: metadata
                .get("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            steps,
            durations,
            created_at: info.start_at.timestamp(),
            finished_at: finished_at.timestamp(),
            placement: Placement::from(info),
        };
        self.respond(match kind {
            ContainerKind::Iteration => ResponseEvent::IterationCompleted(data),
            ContainerKind::Loop => ResponseEvent::LoopCompleted(data),
        })
    }
}

fn branch_data(
    branch: ParallelBranchInfo,
    status: Option<&str>,
    error: Option<String>,
) -> ParallelBranchData {
    ParallelBranchData {
        parallel_id: branch.parallel_id,
        parallel_branch_id: branch.parallel_start_node_id,
        parent_parallel_id: branch.parent_parallel_id,
        parent_parallel_start_node_id: branch.parent_parallel_start_node_id,
        iteration_id: branch.in_iteration_id,
        loop_id: branch.in_loop_id,
        status: status.map(str::to_string),
        error,
        created_at: Utc::now().timestamp(),
    }
}
