//! Per-run context handed to every node
//!
//! There is no ambient state: identity, invoke origin, the raw graph configuration, the node
//! factory and the engine limits all travel in an explicit [`RunContext`].

use crate::config::EngineConfig;
use crate::graph::GraphConfig;
use crate::node::NodeFactory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a run was triggered from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokeFrom {
    ServiceApi,
    WebApp,
    Explore,
    #[default]
    Debugger,
}

impl InvokeFrom {
    /// Runs started by end users rather than from the editor
    pub fn is_external(&self) -> bool {
        !matches!(self, InvokeFrom::Debugger)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvokeFrom::ServiceApi => "service-api",
            InvokeFrom::WebApp => "web-app",
            InvokeFrom::Explore => "explore",
            InvokeFrom::Debugger => "debugger",
        }
    }
}

impl fmt::Display for InvokeFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and shared services of one workflow run
#[derive(Clone)]
pub struct RunContext {
    pub tenant_id: String,

    pub app_id: String,

    pub workflow_id: String,

    pub user_id: String,

    pub invoke_from: InvokeFrom,

    /// Nesting depth of workflow-in-workflow invocations
    pub call_depth: u32,

    /// Full graph configuration, including iteration and loop bodies
    pub graph_config: Arc<GraphConfig>,

    pub node_factory: Arc<dyn NodeFactory>,

    pub config: Arc<EngineConfig>,
}

impl RunContext {
    pub fn new(graph_config: Arc<GraphConfig>, node_factory: Arc<dyn NodeFactory>) -> Self {
        Self {
            tenant_id: String::new(),
            app_id: String::new(),
            workflow_id: String::new(),
            user_id: String::new(),
            invoke_from: InvokeFrom::default(),
            call_depth: 0,
            graph_config,
            node_factory,
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_invoke_from(mut self, invoke_from: InvokeFrom) -> Self {
        self.invoke_from = invoke_from;
        self
    }

    pub fn with_call_depth(mut self, call_depth: u32) -> Self {
        self.call_depth = call_depth;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("tenant_id", &self.tenant_id)
            .field("app_id", &self.app_id)
            .field("workflow_id", &self.workflow_id)
            .field("user_id", &self.user_id)
            .field("invoke_from", &self.invoke_from)
            .field("call_depth", &self.call_depth)
            .field("nodes", &self.graph_config.nodes.len())
            .field("config", &self.config)
            .finish()
    }
}
