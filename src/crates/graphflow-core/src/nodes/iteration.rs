//! Iteration node
//!
//! Runs its body once per element of a list and collects `output_selector` from each pass.
//!
//! ```text
//!   IterationStarted
//!     ├─ IterationNext(0) ─ body events ─┐
//!     ├─ IterationNext(1) ─ body events ─┤   sequential: one after another over the shared pool
//!     └─ IterationNext(n) ─ body events ─┘   parallel: engine copies, bounded by a semaphore
//!   IterationSucceeded | IterationFailed
//! ```

use super::subgraph::{Placement, SubGraph};
use crate::error::{GraphError, Result};
use crate::events::GraphEngineEvent;
use crate::graph::NodeConfig;
use crate::node::{Node, NodeContext, NodeEventSink, NodeExecutionType, NodeRunResult};
use crate::runtime::GraphRuntimeState;
use crate::variables::{Segment, VariablePool};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What happens to the iteration when one item fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandleMode {
    #[default]
    Terminated,
    ContinueOnError,
    RemoveAbnormalOutput,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct IterationNodeData {
    pub iterator_selector: Vec<String>,
    pub output_selector: Vec<String>,
    pub start_node_id: String,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default)]
    pub parallel_nums: Option<usize>,
    #[serde(default)]
    pub error_handle_mode: ErrorHandleMode,
    #[serde(default = "default_true")]
    pub flatten_output: bool,
}

/// Outcome of one item
#[derive(Debug, Clone, PartialEq)]
enum ItemOutput {
    Value(Value),
    Failed,
    Cancelled,
}

/// Removes the `item` and `index` bindings however the node exits
struct BindingGuard {
    pool: Arc<RwLock<VariablePool>>,
    node_id: String,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let mut pool = self.pool.write();
        pool.remove(&[self.node_id.as_str(), "item"]);
        pool.remove(&[self.node_id.as_str(), "index"]);
    }
}

pub struct IterationNode {
    id: String,
    data: IterationNodeData,
}

impl IterationNode {
    pub fn from_config(config: &NodeConfig) -> Result<Arc<dyn Node>> {
        Ok(Arc::new(Self {
            id: config.id.clone(),
            data: config.data.parse()?,
        }))
    }

    fn bind(&self, pool: &mut VariablePool, index: usize, item: &Value) -> Result<()> {
        pool.add(&[self.id.as_str(), "index"], index)?;
        pool.add(&[self.id.as_str(), "item"], item.clone())
    }

    fn read_output(&self, pool: &VariablePool) -> Value {
        pool.get(self.data.output_selector.as_slice())
            .map(|segment| segment.to_value())
            .unwrap_or(Value::Null)
    }

    async fn run_sequential(
        &self,
        ctx: &NodeContext,
        body: &SubGraph,
        items: &[Value],
    ) -> Result<(Vec<ItemOutput>, Option<String>)> {
        let mut outputs = Vec::with_capacity(items.len());
        let mut previous: Option<Value> = None;

        for (index, item) in items.iter().enumerate() {
            ctx.events
                .emit(GraphEngineEvent::IterationNext {
                    info: ctx.info.clone(),
                    index,
                    pre_iteration_output: previous.take(),
                })
                .await?;
            self.bind(&mut ctx.runtime_state.variable_pool_mut(), index, item)?;

            let pass = Arc::new(GraphRuntimeState::with_shared_pool(
                ctx.runtime_state.shared_pool(),
                ctx.runtime_state.factory(),
            ));
            let placement = Placement::Iteration {
                index,
                parallel_mode_run_id: None,
            };
            let outcome = body
                .run(pass.clone(), placement, &ctx.events, None)
                .await;
            ctx.runtime_state.merge_child_usage(&pass)?;

            let output = {
                let mut pool = ctx.runtime_state.variable_pool_mut();
                let output = match outcome {
                    Ok(()) => Ok(self.read_output(&pool)),
                    Err(error) => Err(error),
                };
                body.clear_scopes(&mut pool);
                output
            };

            match output {
                Ok(value) => {
                    previous = Some(value.clone());
                    outputs.push(ItemOutput::Value(value));
                }
                Err(error) => {
                    tracing::warn!(node_id = %self.id, index, error = %error, "Iteration item failed");
                    if self.data.error_handle_mode == ErrorHandleMode::Terminated {
                        return Ok((outputs, Some(error)));
                    }
                    outputs.push(ItemOutput::Failed);
                }
            }
        }
        Ok((outputs, None))
    }

    async fn run_parallel(
        &self,
        ctx: &NodeContext,
        body: &SubGraph,
        items: &[Value],
    ) -> Result<(Vec<ItemOutput>, Option<String>)> {
        let workers = ctx.run_context.config.parallel_workers(self.data.parallel_nums);
        let semaphore = Arc::new(Semaphore::new(workers));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(ctx.run_context.config.event_buffer.max(1));
        let mut tasks = JoinSet::new();

        for (index, item) in items.iter().enumerate() {
            let pass = ctx.runtime_state.create_copy();
            self.bind(&mut pass.variable_pool_mut(), index, item)?;
            let pass = Arc::new(pass);

            let body = body.clone();
            let sink = NodeEventSink::new(tx.clone(), ctx.info.clone());
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let output_selector = self.data.output_selector.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                if permit.is_none() || cancel.is_cancelled() {
                    return (index, pass, Err(None));
                }

                let next = GraphEngineEvent::IterationNext {
                    info: sink.info().clone(),
                    index,
                    pre_iteration_output: None,
                };
                if sink.emit(next).await.is_err() {
                    return (index, pass, Err(None));
                }

                let placement = Placement::Iteration {
                    index,
                    parallel_mode_run_id: Some(Uuid::new_v4().to_string()),
                };
                let outcome = body.run(pass.clone(), placement, &sink, Some(&cancel)).await;
                let result = match outcome {
                    Ok(()) => Ok(pass
                        .variable_pool()
                        .get(output_selector.as_slice())
                        .map(|segment| segment.to_value())
                        .unwrap_or(Value::Null)),
                    Err(error) => Err(Some(error)),
                };
                (index, pass, result)
            });
        }
        drop(tx);

        let mut outputs = vec![ItemOutput::Cancelled; items.len()];
        let mut first_error: Option<String> = None;
        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    if !cancel.is_cancelled() {
                        ctx.events.emit(event).await?;
                    }
                }
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    let Some(joined) = joined else { continue };
                    let (index, pass, result) = joined.map_err(|e| {
                        GraphError::Iteration(format!("Iteration worker failed: {}", e))
                    })?;
                    ctx.runtime_state.merge_child_usage(&pass)?;
                    outputs[index] = match result {
                        Ok(value) => ItemOutput::Value(value),
                        Err(None) => ItemOutput::Cancelled,
                        Err(Some(error)) => {
                            tracing::warn!(node_id = %self.id, index, error = %error, "Iteration item failed");
                            if self.data.error_handle_mode == ErrorHandleMode::Terminated
                                && first_error.is_none()
                            {
                                first_error = Some(error);
                                cancel.cancel();
                            }
                            ItemOutput::Failed
                        }
                    };
                }
                else => break,
            }
        }
        Ok((outputs, first_error))
    }

    fn collect(&self, outputs: Vec<ItemOutput>) -> Value {
        let values: Vec<Value> = outputs
            .into_iter()
            .filter_map(|output| match output {
                ItemOutput::Value(value) => Some(value),
                ItemOutput::Failed => match self.data.error_handle_mode {
                    ErrorHandleMode::ContinueOnError => Some(Value::Null),
                    _ => None,
                },
                ItemOutput::Cancelled => None,
            })
            .collect();
        if self.data.flatten_output {
            flatten(values)
        } else {
            Value::Array(values)
        }
    }
}

/// Flatten one level when every element is a list
fn flatten(values: Vec<Value>) -> Value {
    if values.is_empty() || !values.iter().all(Value::is_array) {
        return Value::Array(values);
    }
    Value::Array(
        values
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(inner) => inner,
                other => vec![other],
            })
            .collect(),
    )
}

#[async_trait]
impl Node for IterationNode {
    fn execution_type(&self) -> NodeExecutionType {
        NodeExecutionType::Container
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let iterator = ctx
            .runtime_state
            .variable_pool()
            .get(self.data.iterator_selector.as_slice());
        let items = match iterator {
            None => {
                return Err(GraphError::Iteration(format!(
                    "Iterator variable {} not found",
                    self.data.iterator_selector.join(".")
                )))
            }
            Some(Segment::None) => Vec::new(),
            Some(segment) => segment.to_array().ok_or_else(|| {
                GraphError::Iteration(format!(
                    "Invalid iterator value: {}, please provide a list.",
                    segment.text()
                ))
            })?,
        };

        let mut inputs = Map::new();
        inputs.insert("iterator_selector".into(), Value::Array(items.clone()));
        if items.is_empty() {
            return Ok(NodeRunResult::succeeded(Map::new())
                .with_inputs(inputs)
                .with_output("output", Value::Array(Vec::new())));
        }

        let body = SubGraph::build(&ctx, &self.data.start_node_id)?;
        let _guard = BindingGuard {
            pool: ctx.runtime_state.shared_pool(),
            node_id: self.id.clone(),
        };
        let tokens_before = ctx.runtime_state.total_tokens();

        ctx.events
            .emit(GraphEngineEvent::IterationStarted {
                info: ctx.info.clone(),
                inputs: inputs.clone(),
                metadata: Map::new(),
            })
            .await?;

        let (outputs, failure) = if self.data.is_parallel {
            self.run_parallel(&ctx, &body, &items).await?
        } else {
            self.run_sequential(&ctx, &body, &items).await?
        };

        let steps = items.len();
        let mut metadata = Map::new();
        metadata.insert(
            "total_tokens".into(),
            json!(ctx.runtime_state.total_tokens().saturating_sub(tokens_before)),
        );

        if let Some(error) = failure {
            let partial: Vec<Value> = outputs
                .into_iter()
                .filter_map(|output| match output {
                    ItemOutput::Value(value) => Some(value),
                    _ => None,
                })
                .collect();
            let mut failed_outputs = Map::new();
            failed_outputs.insert("output".into(), Value::Array(partial));
            ctx.events
                .emit(GraphEngineEvent::IterationFailed {
                    info: ctx.info.clone(),
                    inputs: inputs.clone(),
                    outputs: failed_outputs.clone(),
                    metadata,
                    steps,
                    error: error.clone(),
                })
                .await?;
            let mut result = NodeRunResult::failed(error, "IterationNodeError").with_inputs(inputs);
            result.outputs = failed_outputs;
            return Ok(result);
        }

        let output = self.collect(outputs);
        let mut final_outputs = Map::new();
        final_outputs.insert("output".into(), output);
        ctx.events
            .emit(GraphEngineEvent::IterationSucceeded {
                info: ctx.info.clone(),
                inputs: inputs.clone(),
                outputs: final_outputs.clone(),
                metadata: metadata.clone(),
                steps,
            })
            .await?;

        Ok(NodeRunResult::succeeded(final_outputs)
            .with_inputs(inputs)
            .with_metadata(metadata))
    }
}
