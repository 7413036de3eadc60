//! Streaming and blocking front ends over one engine run

use crate::cycle_manager::WorkflowCycleManager;
use crate::error::{PipelineError, Result};
use crate::repository::Repositories;
use crate::responses::{ResponseEvent, StreamResponse, WorkflowBlockingResponse};
use futures::{Stream, StreamExt};
use graphflow_core::GraphEngine;
use serde_json::{Map, Value};
use std::pin::Pin;

/// Client responses of one run, ending with exactly one `workflow_finished`
pub type ResponseStream = Pin<Box<dyn Stream<Item = StreamResponse> + Send>>;

/// Drives a [`GraphEngine`] and reconciles its events with run records
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use graphflow_core::GraphEngine;
/// use graphflow_pipeline::{InMemoryRepository, Repositories, WorkflowTaskPipeline};
/// use std::sync::Arc;
///
/// # async fn example(engine: GraphEngine) {
/// let repositories = Repositories::from_store(Arc::new(InMemoryRepository::new()));
/// let mut responses = WorkflowTaskPipeline::new(engine, repositories).process_stream();
/// while let Some(response) = responses.next().await {
///     println!("{}", serde_json::to_string(&response).unwrap_or_default());
/// }
/// # }
/// ```
pub struct WorkflowTaskPipeline {
    engine: GraphEngine,
    manager: WorkflowCycleManager,
}

impl WorkflowTaskPipeline {
    /// Record the run's inputs from the engine's pool and bind a cycle manager to it
    ///
    /// `sys.workflow_run_id`, when bound, becomes the run id.
    pub fn new(engine: GraphEngine, repositories: Repositories) -> Self {
        let state = engine.runtime_state().clone();
        let inputs = run_inputs(&state.variable_pool());
        let run_id = inputs
            .get("sys.workflow_run_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut manager =
            WorkflowCycleManager::new(engine.run_context().clone(), repositories, inputs)
                .with_runtime_state(state);
        if let Some(run_id) = run_id {
            manager = manager.with_run_id(run_id);
        }
        Self { engine, manager }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.manager = self.manager.with_task_id(task_id);
        self
    }

    pub fn run_id(&self) -> &str {
        self.manager.run_id()
    }

    /// Start the run and stream its responses
    pub fn process_stream(self) -> ResponseStream {
        let Self {
            engine,
            mut manager,
        } = self;
        let mut events = engine.run();

        let responses = async_stream::stream! {
            let mut finished = false;
            while let Some(event) = events.next().await {
                let terminal = event.is_graph_terminal();
                let response = manager.handle_event(event).await;
                if terminal {
                    manager.flush().await;
                    finished = true;
                }
                if let Some(response) = response {
                    yield response;
                }
                if terminal {
                    break;
                }
            }
            if !finished {
                manager.flush().await;
                yield manager.finish_without_terminal().await;
            }
        };
        Box::pin(responses)
    }

    /// Run to the end and return only the finish response
    pub async fn process_blocking(self) -> Result<WorkflowBlockingResponse> {
        let run_id = self.run_id().to_string();
        let mut responses = self.process_stream();

        let mut blocking = None;
        while let Some(response) = responses.next().await {
            if let ResponseEvent::WorkflowFinished(data) = response.event {
                blocking = Some(WorkflowBlockingResponse {
                    task_id: response.task_id,
                    workflow_run_id: response.workflow_run_id,
                    data,
                });
            }
        }
        blocking.ok_or(PipelineError::MissingFinish(run_id))
    }
}

/// User inputs plus every `sys.*` value, keyed `sys.{name}`
fn run_inputs(pool: &graphflow_core::VariablePool) -> Map<String, Value> {
    let mut inputs = pool.user_inputs().clone();
    for (name, value) in pool.get_by_prefix("sys") {
        inputs.insert(format!("sys.{}", name), value);
    }
    inputs
}
