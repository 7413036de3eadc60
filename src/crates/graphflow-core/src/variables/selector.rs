//! Selectors address values in the pool
//!
//! A selector is `(scope_id, name[, attr...])`. `scope_id` is a node id or one of the reserved
//! scopes below. Equality is structural.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// System variables (`sys.query`, `sys.user_id`, ...)
pub const SYSTEM_VARIABLE_NODE_ID: &str = "sys";
/// Environment variables configured on the workflow
pub const ENVIRONMENT_VARIABLE_NODE_ID: &str = "env";
/// Conversation-scoped variables
pub const CONVERSATION_VARIABLE_NODE_ID: &str = "conversation";
/// Pipeline inputs
pub const RAG_PIPELINE_VARIABLE_NODE_ID: &str = "rag";

/// Length of a selector that names a binding
pub const SELECTORS_LENGTH: usize = 2;

/// Owned selector
///
/// ```rust
/// use graphflow_core::variables::Selector;
///
/// let selector = Selector::parse("llm.usage.total_tokens").unwrap();
/// assert_eq!(selector.scope(), "llm");
/// assert_eq!(selector.name(), "usage");
/// assert_eq!(selector.attributes(), ["total_tokens"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Vec<String>);

impl Selector {
    /// Build from parts; at least `(scope_id, name)` is required
    pub fn new<S: AsRef<str>>(parts: &[S]) -> Result<Self> {
        if parts.len() < SELECTORS_LENGTH || parts.iter().any(|p| p.as_ref().is_empty()) {
            return Err(GraphError::invalid_selector(parts));
        }
        Ok(Self(parts.iter().map(|p| p.as_ref().to_string()).collect()))
    }

    /// Parse the dotted form `scope.name.attr`
    pub fn parse(dotted: &str) -> Result<Self> {
        let parts: Vec<&str> = dotted.split('.').collect();
        Self::new(&parts)
    }

    pub fn scope(&self) -> &str {
        &self.0[0]
    }

    pub fn name(&self) -> &str {
        &self.0[1]
    }

    /// Path segments after `(scope_id, name)`
    pub fn attributes(&self) -> &[String] {
        &self.0[SELECTORS_LENGTH..]
    }

    /// The `(scope_id, name)` prefix
    pub fn binding(&self) -> Selector {
        Selector(self.0[..SELECTORS_LENGTH].to_vec())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Whether the scope is one of the reserved non-node scopes
    pub fn is_reserved_scope(&self) -> bool {
        is_reserved_scope(self.scope())
    }
}

pub fn is_reserved_scope(scope: &str) -> bool {
    matches!(
        scope,
        SYSTEM_VARIABLE_NODE_ID
            | ENVIRONMENT_VARIABLE_NODE_ID
            | CONVERSATION_VARIABLE_NODE_ID
            | RAG_PIPELINE_VARIABLE_NODE_ID
    )
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl AsRef<[String]> for Selector {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for Selector {
    type Error = GraphError;

    fn try_from(parts: Vec<String>) -> Result<Self> {
        Self::new(&parts)
    }
}
