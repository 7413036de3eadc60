//! # graphflow-pipeline - Run records and client responses
//!
//! Turns the event stream of a [`graphflow_core::GraphEngine`] into:
//!
//! - durable [`WorkflowRun`] and [`NodeExecution`] records, written through the
//!   [`repository`] traits;
//! - one app-log entry per finished run started from outside the editor;
//! - draft variables for every node that produced values;
//! - a stream of [`StreamResponse`]s for the client, or a single
//!   [`WorkflowBlockingResponse`] in blocking mode.
//!
//! ```text
//! GraphEngine::run ──► GraphEngineEvent ──► WorkflowCycleManager ──► StreamResponse
//!                                                 │
//!                                                 ▼
//!                                    Repositories (runs, nodes, logs, drafts)
//! ```

pub mod cycle_manager;
pub mod entities;
pub mod error;
pub mod pipeline;
pub mod repository;
pub mod responses;

pub use cycle_manager::{WorkflowCycleManager, MISSING_TERMINAL_ERROR};
pub use entities::{
    DraftVariableKey, ExecutionMetadata, NodeExecution, NodeExecutionStatus, WorkflowAppLog,
    WorkflowRun, WorkflowRunStatus, WorkflowRunTriggeredFrom,
};
pub use error::{PipelineError, Result};
pub use pipeline::{ResponseStream, WorkflowTaskPipeline};
pub use repository::{
    AppLogRepository, DraftVariableSink, DraftVariableWrite, InMemoryRepository,
    NodeExecutionRepository, Repositories, WorkflowRunRepository,
};
pub use responses::{ResponseEvent, StreamResponse, WorkflowBlockingResponse};
