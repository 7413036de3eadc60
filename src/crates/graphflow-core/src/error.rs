//! Error types for graph construction, variable addressing and execution
//!
//! ```text
//! GraphError
//! ├── InvalidSelector             - malformed variable selector
//! ├── Validation                  - graph structure errors
//! ├── Configuration               - bad setup (unknown node type, graph attach mismatch, ...)
//! ├── UnsupportedSnapshotVersion  - runtime-state document from another version
//! ├── NodeExecution               - a node's run failed
//! ├── Iteration                   - iterator/data errors inside iteration and loop nodes
//! ├── Execution                   - run-level failures
//! ├── State                       - runtime-state invariant violations
//! ├── Checkpoint                  - snapshot storage
//! ├── Serialization / Yaml / Toml - document parsing
//! ├── Io
//! ├── Timeout
//! └── Custom
//! ```
//!
//! Configuration-class errors (`InvalidSelector`, `Validation`, `Configuration`,
//! `UnsupportedSnapshotVersion`) are raised synchronously while a run is being set up and are
//! never retried. Everything a node raises at run time is turned into a node failure event by
//! the engine instead of propagating.

use thiserror::Error;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// A selector does not have the shape an operation requires
    ///
    /// ```rust
    /// use graphflow_core::{GraphError, VariablePool};
    ///
    /// let mut pool = VariablePool::empty();
    /// let err = pool.add(&["node", "a", "b"], "value").unwrap_err();
    /// assert!(matches!(err, GraphError::InvalidSelector(_)));
    /// ```
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Graph structure is invalid
    #[error("Graph validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A runtime-state document carries a version tag this build does not understand
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedSnapshotVersion(String),

    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Id of the failing node
        node: String,
        /// Error message
        error: String,
    },

    /// Iterator or loop data problem, fatal to the enclosing container node only
    #[error("Iteration error: {0}")]
    Iteration(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] graphflow_checkpoint::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    pub fn invalid_selector(selector: &[impl AsRef<str>]) -> Self {
        let joined: Vec<&str> = selector.iter().map(|s| s.as_ref()).collect();
        Self::InvalidSelector(format!("[{}]", joined.join(", ")))
    }

    /// Stable name of the variant, recorded as `error_type` on failed node results
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidSelector(_) => "InvalidSelectorError",
            Self::Validation(_) => "ValidationError",
            Self::Configuration(_) => "ConfigurationError",
            Self::UnsupportedSnapshotVersion(_) => "UnsupportedSnapshotVersionError",
            Self::NodeExecution { .. } => "NodeExecutionError",
            Self::Iteration(_) => "IterationNodeError",
            Self::Execution(_) => "ExecutionError",
            Self::State(_) => "StateError",
            Self::Checkpoint(_) => "CheckpointError",
            Self::Serialization(_) | Self::Yaml(_) | Self::Toml(_) => "SerializationError",
            Self::Io(_) => "IoError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Custom(_) => "CustomError",
        }
    }

    /// Whether the error belongs to the configuration class raised during setup
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidSelector(_)
                | Self::Validation(_)
                | Self::Configuration(_)
                | Self::UnsupportedSnapshotVersion(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_execution_display() {
        let err = GraphError::node_execution("llm", "API timeout");
        assert_eq!(err.to_string(), "Node 'llm' execution failed: API timeout");
        assert_eq!(err.error_type(), "NodeExecutionError");
    }

    #[test]
    fn test_invalid_selector_formats_path() {
        let err = GraphError::invalid_selector(&["a", "b", "c"]);
        assert_eq!(err.to_string(), "Invalid selector: [a, b, c]");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_runtime_errors_are_not_configuration() {
        assert!(!GraphError::Iteration("x".into()).is_configuration());
        assert!(GraphError::UnsupportedSnapshotVersion("2.0".into()).is_configuration());
    }
}
