//! Loop node: reruns its body until a break condition holds or `loop_count` rounds have run

use super::condition::{evaluate_conditions, Condition, LogicalOperator};
use super::subgraph::{Placement, SubGraph};
use crate::error::Result;
use crate::events::GraphEngineEvent;
use crate::graph::NodeConfig;
use crate::node::{Node, NodeContext, NodeExecutionType, NodeRunResult};
use crate::runtime::GraphRuntimeState;
use crate::variables::VariablePool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// How the initial value of a loop variable is given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopValueType {
    #[default]
    Constant,
    /// `value` is a selector into the pool
    Variable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopVariable {
    pub label: String,
    #[serde(default)]
    pub value_type: LoopValueType,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopNodeData {
    pub loop_count: usize,
    pub start_node_id: String,
    #[serde(default)]
    pub loop_variables: Vec<LoopVariable>,
    #[serde(default)]
    pub break_conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

pub struct LoopNode {
    id: String,
    data: LoopNodeData,
}

impl LoopNode {
    pub fn from_config(config: &NodeConfig) -> Result<Arc<dyn Node>> {
        Ok(Arc::new(Self {
            id: config.id.clone(),
            data: config.data.parse()?,
        }))
    }

    fn initial_value(&self, pool: &VariablePool, variable: &LoopVariable) -> Value {
        match variable.value_type {
            LoopValueType::Constant => variable.value.clone(),
            LoopValueType::Variable => {
                let selector: Vec<String> = match &variable.value {
                    Value::Array(parts) => parts
                        .iter()
                        .filter_map(|p| p.as_str().map(str::to_string))
                        .collect(),
                    Value::String(dotted) => dotted.split('.').map(str::to_string).collect(),
                    _ => Vec::new(),
                };
                pool.get(selector.as_slice())
                    .map(|segment| segment.to_value())
                    .unwrap_or(Value::Null)
            }
        }
    }

    fn loop_values(&self, pool: &VariablePool) -> Map<String, Value> {
        self.data
            .loop_variables
            .iter()
            .map(|variable| {
                let value = pool
                    .get(&[self.id.as_str(), variable.label.as_str()])
                    .map(|segment| segment.to_value())
                    .unwrap_or(Value::Null);
                (variable.label.clone(), value)
            })
            .collect()
    }

    fn should_break(&self, pool: &VariablePool) -> bool {
        !self.data.break_conditions.is_empty()
            && evaluate_conditions(pool, &self.data.break_conditions, self.data.logical_operator)
    }
}

#[async_trait]
impl Node for LoopNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Container
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        {
            let mut pool = ctx.runtime_state.variable_pool_mut();
            for variable in &self.data.loop_variables {
                let value = self.initial_value(&pool, variable);
                pool.add(&[self.id.as_str(), variable.label.as_str()], value)?;
            }
        }

        let mut inputs = Map::new();
        inputs.insert("loop_count".into(), json!(self.data.loop_count));
        let body = SubGraph::build(&ctx, &self.data.start_node_id)?;
        let tokens_before = ctx.runtime_state.total_tokens();

        ctx.events
            .emit(GraphEngineEvent::LoopStarted {
                info: ctx.info.clone(),
                inputs: inputs.clone(),
                metadata: Map::new(),
            })
            .await?;

        let mut rounds = 0usize;
        let mut previous: Option<Value> = None;
        let mut failure: Option<String> = None;
        for index in 0..self.data.loop_count {
            ctx.events
                .emit(GraphEngineEvent::LoopNext {
                    info: ctx.info.clone(),
                    index,
                    pre_loop_output: previous.take(),
                })
                .await?;

            let pass = Arc::new(GraphRuntimeState::with_shared_pool(
                ctx.runtime_state.shared_pool(),
                ctx.runtime_state.factory(),
            ));
            let outcome = body
                .run(pass.clone(), Placement::Loop { index }, &ctx.events, None)
                .await;
            ctx.runtime_state.merge_child_usage(&pass)?;
            rounds += 1;

            if let Err(error) = outcome {
                tracing::warn!(node_id = %self.id, index, error = %error, "Loop round failed");
                failure = Some(error);
                break;
            }

            let stop = {
                let mut pool = ctx.runtime_state.variable_pool_mut();
                previous = Some(Value::Object(self.loop_values(&pool)));
                let stop = self.should_break(&pool);
                if !stop && index + 1 < self.data.loop_count {
                    body.clear_scopes(&mut pool);
                }
                stop
            };
            if stop {
                tracing::debug!(node_id = %self.id, rounds, "Loop break condition reached");
                break;
            }
        }

        let mut outputs = self.loop_values(&ctx.runtime_state.variable_pool());
        outputs.insert("loop_round".into(), json!(rounds));
        let mut metadata = Map::new();
        metadata.insert("loop_round".into(), json!(rounds));
        metadata.insert(
            "total_tokens".into(),
            json!(ctx.runtime_state.total_tokens().saturating_sub(tokens_before)),
        );

        if let Some(error) = failure {
            ctx.events
                .emit(GraphEngineEvent::LoopFailed {
                    info: ctx.info.clone(),
                    inputs: inputs.clone(),
                    outputs: outputs.clone(),
                    metadata,
                    steps: rounds,
                    error: error.clone(),
                })
                .await?;
            let mut result = NodeRunResult::failed(error, "LoopNodeError").with_inputs(inputs);
            result.outputs = outputs;
            return Ok(result);
        }

        ctx.events
            .emit(GraphEngineEvent::LoopSucceeded {
                info: ctx.info.clone(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                metadata: metadata.clone(),
                steps: rounds,
            })
            .await?;

        Ok(NodeRunResult::succeeded(outputs)
            .with_inputs(inputs)
            .with_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_node(value: Value) -> LoopNode {
        LoopNode {
            id: "loop".into(),
            data: serde_json::from_value(value).unwrap(),
        }
    }

    #[test]
    fn test_initial_values_from_constant_and_selector() {
        let node = loop_node(json!({
            "loop_count": 3,
            "start_node_id": "ls",
            "loop_variables": [
                {"label": "count", "value_type": "constant", "value": 0},
                {"label": "name", "value_type": "variable", "value": ["start", "name"]}
            ]
        }));
        let mut pool = VariablePool::empty();
        pool.add(&["start", "name"], "Ada").unwrap();

        let count = node.initial_value(&pool, &node.data.loop_variables[0]);
        let name = node.initial_value(&pool, &node.data.loop_variables[1]);
        assert_eq!(count, json!(0));
        assert_eq!(name, json!("Ada"));
    }

    #[test]
    fn test_break_requires_conditions() {
        let pool = VariablePool::empty();
        let node = loop_node(json!({"loop_count": 1, "start_node_id": "ls"}));
        assert!(!node.should_break(&pool));

        let mut pool = VariablePool::empty();
        pool.add(&["loop", "count"], 3).unwrap();
        let node = loop_node(json!({
            "loop_count": 5,
            "start_node_id": "ls",
            "break_conditions": [
                {"variable_selector": ["loop", "count"], "comparison_operator": "≥", "value": 3}
            ]
        }));
        assert!(node.should_break(&pool));
        assert_eq!(node.loop_values(&pool), Map::new());
    }
}
