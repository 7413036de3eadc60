//! Start, end, answer and if-else nodes plus the start markers of container bodies

use super::condition::{evaluate_conditions, Condition, LogicalOperator};
use crate::error::{GraphError, Result};
use crate::graph::NodeConfig;
use crate::node::{Node, NodeContext, NodeExecutionType, NodeRunResult};
use crate::variables::{Segment, Template, SYSTEM_VARIABLE_NODE_ID};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
struct StartVariable {
    variable: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StartNodeData {
    #[serde(default)]
    variables: Vec<StartVariable>,
}

/// Entry node; publishes the user inputs and the `sys.*` variables as its outputs
pub struct StartNode {
    data: StartNodeData,
}

impl StartNode {
    pub fn from_config(config: &NodeConfig) -> Result<Arc<dyn Node>> {
        Ok(Arc::new(Self {
            data: config.data.parse()?,
        }))
    }
}

#[async_trait]
impl Node for StartNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Root
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let pool = ctx.runtime_state.variable_pool();
        let mut outputs = pool.user_inputs().clone();

        for declared in &self.data.variables {
            if outputs.contains_key(&declared.variable) {
                continue;
            }
            match &declared.default {
                Some(default) => {
                    outputs.insert(declared.variable.clone(), default.clone());
                }
                None if declared.required => {
                    return Err(GraphError::Validation(format!(
                        "{} is required in input form",
                        declared.variable
                    )));
                }
                None => {}
            }
        }

        let inputs = outputs.clone();
        for (name, value) in pool.get_by_prefix(SYSTEM_VARIABLE_NODE_ID) {
            outputs.insert(format!("{}.{}", SYSTEM_VARIABLE_NODE_ID, name), value);
        }

        Ok(NodeRunResult::succeeded(outputs).with_inputs(inputs))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OutputVariable {
    variable: String,
    value_selector: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EndNodeData {
    #[serde(default)]
    outputs: Vec<OutputVariable>,
}

/// Workflow exit; collects the configured selectors into the run outputs
pub struct EndNode {
    data: EndNodeData,
}

impl EndNode {
    pub fn from_config(config: &NodeConfig) -> Result<Arc<dyn Node>> {
        Ok(Arc::new(Self {
            data: config.data.parse()?,
        }))
    }
}

#[async_trait]
impl Node for EndNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Response
    }

    fn streaming_template(&self) -> Option<Template> {
        Some(Template::from_selectors(
            self.data.outputs.iter().map(|o| o.value_selector.clone()),
        ))
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let pool = ctx.runtime_state.variable_pool();
        let outputs: Map<String, Value> = self
            .data
            .outputs
            .iter()
            .map(|output| {
                let value = pool
                    .get(output.value_selector.as_slice())
                    .map(|segment| segment.to_value())
                    .unwrap_or(Value::Null);
                (output.variable.clone(), value)
            })
            .collect();
        Ok(NodeRunResult::succeeded(outputs.clone()).with_inputs(outputs))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnswerNodeData {
    #[serde(default)]
    answer: String,
}

/// Chat reply rendered from a template
pub struct AnswerNode {
    data: AnswerNodeData,
    template: Template,
}

impl AnswerNode {
    pub fn from_config(config: &NodeConfig) -> Result<Arc<dyn Node>> {
        let data: AnswerNodeData = config.data.parse()?;
        let template = Template::parse(&data.answer);
        Ok(Arc::new(Self { data, template }))
    }
}

#[async_trait]
impl Node for AnswerNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Response
    }

    fn streaming_template(&self) -> Option<Template> {
        Some(self.template.clone())
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let rendered = ctx
            .runtime_state
            .variable_pool()
            .convert_template(&self.data.answer);
        let files: Vec<Value> = rendered
            .segments()
            .iter()
            .flat_map(Segment::files)
            .map(|file| file.to_value())
            .collect();

        Ok(NodeRunResult::succeeded(Map::new())
            .with_output("answer", rendered.markdown())
            .with_output("files", Value::Array(files)))
    }
}

/// Handle taken when no case of an if-else node matches
pub const ELSE_HANDLE: &str = "false";

#[derive(Debug, Clone, Deserialize)]
struct IfElseCase {
    case_id: String,
    #[serde(default)]
    logical_operator: LogicalOperator,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IfElseNodeData {
    #[serde(default)]
    cases: Vec<IfElseCase>,
    // single-case form: `conditions` + `logical_operator` at the top level, handle "true"
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    logical_operator: LogicalOperator,
}

/// Picks the first case whose conditions hold and routes through its `case_id` handle
pub struct IfElseNode {
    cases: Vec<IfElseCase>,
}

impl IfElseNode {
    pub fn from_config(config: &NodeConfig) -> Result<Arc<dyn Node>> {
        let data: IfElseNodeData = config.data.parse()?;
        let cases = if data.cases.is_empty() && !data.conditions.is_empty() {
            vec![IfElseCase {
                case_id: "true".to_string(),
                logical_operator: data.logical_operator,
                conditions: data.conditions,
            }]
        } else {
            data.cases
        };
        Ok(Arc::new(Self { cases }))
    }
}

#[async_trait]
impl Node for IfElseNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Branch
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let selected = {
            let pool = ctx.runtime_state.variable_pool();
            self.cases
                .iter()
                .find(|case| evaluate_conditions(&pool, &case.conditions, case.logical_operator))
                .map(|case| case.case_id.clone())
        };

        let handle = selected.clone().unwrap_or_else(|| ELSE_HANDLE.to_string());
        tracing::debug!(node_id = ctx.node_id(), handle = %handle, "if-else selected");

        Ok(NodeRunResult::succeeded(Map::new())
            .with_output("result", selected.is_some())
            .with_output("selected_case_id", handle.clone())
            .with_edge_source_handle(handle))
    }
}

/// Root of an iteration or loop body; does nothing itself
pub struct BodyStartNode;

impl BodyStartNode {
    pub fn from_config(_config: &NodeConfig) -> Result<Arc<dyn Node>> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl Node for BodyStartNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Root
    }

    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult> {
        Ok(NodeRunResult::succeeded(Map::new()))
    }
}
