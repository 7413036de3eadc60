//! Error types for the task pipeline

use graphflow_core::GraphError;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Engine setup failed before the run started
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// A persistence backend rejected a write or read
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Workflow run not found: {0}")]
    WorkflowRunNotFound(String),

    /// The response stream ended without a finish response
    #[error("Workflow run {0} produced no finish response")]
    MissingFinish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
