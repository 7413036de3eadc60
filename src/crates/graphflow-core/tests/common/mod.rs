//! Shared fixtures: test node types and a run helper
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use graphflow_core::{
    EngineConfig, Graph, GraphConfig, GraphEngine, GraphEngineEvent, GraphRuntimeState,
    LlmUsage, Node, NodeConfig, NodeContext, NodeRegistry, NodeRunResult, Result, RunContext,
    VariablePool,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outputs `data.outputs` and reports `data.tokens` as usage
struct EchoNode {
    outputs: Map<String, Value>,
    tokens: u64,
}

#[async_trait]
impl Node for EchoNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult> {
        let mut usage = LlmUsage::empty();
        usage.total_tokens = self.tokens;
        Ok(NodeRunResult::succeeded(self.outputs.clone()).with_llm_usage(usage))
    }
}

/// Fails its first `fail_times` runs
struct FlakyNode {
    fail_times: usize,
    attempts: AtomicUsize,
}

#[async_trait]
impl Node for FlakyNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            return Ok(NodeRunResult::failed(format!("attempt {} failed", attempt), "FlakyError"));
        }
        Ok(NodeRunResult::succeeded(Map::new()).with_output("attempts", attempt as u64 + 1))
    }
}

/// Sleeps `data.ms` then outputs `done = true`
struct SleepNode {
    ms: u64,
}

#[async_trait]
impl Node for SleepNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeRunResult> {
        tokio::time::sleep(Duration::from_millis(self.ms)).await;
        Ok(NodeRunResult::succeeded(Map::new()).with_output("done", true))
    }
}

/// Pauses until `approval.granted` is bound
struct GateNode;

#[async_trait]
impl Node for GateNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let granted = ctx
            .runtime_state
            .variable_pool()
            .get(&["approval", "granted"])
            .is_some();
        if granted {
            Ok(NodeRunResult::succeeded(Map::new()).with_output("approved", true))
        } else {
            Ok(NodeRunResult::paused())
        }
    }
}

/// Doubles the number at `data.source`; fails when it equals `data.fail_on`
struct DoubleNode {
    source: Vec<String>,
    fail_on: Option<i64>,
}

#[async_trait]
impl Node for DoubleNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let value = ctx
            .runtime_state
            .variable_pool()
            .get(self.source.as_slice())
            .and_then(|segment| segment.as_f64())
            .unwrap_or_default() as i64;
        if Some(value) == self.fail_on {
            return Ok(NodeRunResult::failed(format!("cannot double {}", value), "DoubleError"));
        }
        Ok(NodeRunResult::succeeded(Map::new()).with_output("value", value * 2))
    }
}

/// Increments the number bound at `data.target`
struct IncrementNode {
    target: Vec<String>,
}

#[async_trait]
impl Node for IncrementNode {
    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult> {
        let mut pool = ctx.runtime_state.variable_pool_mut();
        let current = pool
            .get(self.target.as_slice())
            .and_then(|segment| segment.as_f64())
            .unwrap_or_default() as i64;
        pool.add(self.target.as_slice(), current + 1)?;
        Ok(NodeRunResult::succeeded(Map::new()).with_output("value", current + 1))
    }
}

fn extra<'a>(config: &'a NodeConfig, key: &str) -> Option<&'a Value> {
    config.data.extra.get(key)
}

fn selector(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Built-ins plus the test node types
pub fn registry() -> NodeRegistry {
    NodeRegistry::with_builtins()
        .with_node("echo", |config| {
            let outputs = extra(config, "outputs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let tokens = extra(config, "tokens").and_then(Value::as_u64).unwrap_or(0);
            Ok(Arc::new(EchoNode { outputs, tokens }) as Arc<dyn Node>)
        })
        .with_node("flaky", |config| {
            let fail_times = extra(config, "fail_times")
                .and_then(Value::as_u64)
                .unwrap_or(1) as usize;
            Ok(Arc::new(FlakyNode {
                fail_times,
                attempts: AtomicUsize::new(0),
            }) as Arc<dyn Node>)
        })
        .with_node("sleep", |config| {
            let ms = extra(config, "ms").and_then(Value::as_u64).unwrap_or(10);
            Ok(Arc::new(SleepNode { ms }) as Arc<dyn Node>)
        })
        .with_node("gate", |_| Ok(Arc::new(GateNode) as Arc<dyn Node>))
        .with_node("double", |config| {
            Ok(Arc::new(DoubleNode {
                source: selector(extra(config, "source")),
                fail_on: extra(config, "fail_on").and_then(Value::as_i64),
            }) as Arc<dyn Node>)
        })
        .with_node("increment", |config| {
            Ok(Arc::new(IncrementNode {
                target: selector(extra(config, "target")),
            }) as Arc<dyn Node>)
        })
}

pub fn graph_config(value: Value) -> GraphConfig {
    serde_json::from_value(value).expect("valid graph config")
}

/// Everything needed to start one engine
pub struct Fixture {
    pub config: Arc<GraphConfig>,
    pub registry: Arc<NodeRegistry>,
    pub engine_config: EngineConfig,
}

impl Fixture {
    pub fn new(value: Value) -> Self {
        Self {
            config: Arc::new(graph_config(value)),
            registry: Arc::new(registry()),
            engine_config: EngineConfig::default(),
        }
    }

    pub fn with_engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    pub fn graph(&self) -> Arc<Graph> {
        Arc::new(Graph::init(&self.config, self.registry.as_ref(), None).expect("graph builds"))
    }

    pub fn run_context(&self) -> Arc<RunContext> {
        Arc::new(
            RunContext::new(self.config.clone(), self.registry.clone())
                .with_workflow_id("wf-test")
                .with_config(self.engine_config.clone()),
        )
    }

    pub fn engine(&self, state: Arc<GraphRuntimeState>) -> GraphEngine {
        GraphEngine::new(self.graph(), state, self.run_context()).expect("engine builds")
    }

    /// Run to the end over `pool` and collect every event
    pub async fn run(&self, pool: VariablePool) -> (Vec<GraphEngineEvent>, Arc<GraphRuntimeState>) {
        let state = Arc::new(GraphRuntimeState::new(pool));
        let events = collect(self.engine(state.clone())).await;
        (events, state)
    }
}

pub async fn collect(engine: GraphEngine) -> Vec<GraphEngineEvent> {
    engine.run().collect().await
}

/// Pool carrying `inputs` as the user inputs read by the start node
pub fn pool_with_inputs(inputs: Value) -> VariablePool {
    let inputs = inputs.as_object().cloned().unwrap_or_default();
    VariablePool::builder().user_inputs(inputs).build()
}

pub fn names(events: &[GraphEngineEvent]) -> Vec<&'static str> {
    events.iter().map(GraphEngineEvent::name).collect()
}

/// Concatenated text of every top-level stream chunk
pub fn streamed_text(events: &[GraphEngineEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::NodeRunStreamChunk { info, chunk, .. } if !info.is_nested() => {
                Some(chunk.as_str())
            }
            _ => None,
        })
        .collect()
}

pub fn started_nodes(events: &[GraphEngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::NodeRunStarted { info } if !info.is_nested() => {
                Some(info.node_id.clone())
            }
            _ => None,
        })
        .collect()
}

pub fn terminal(events: &[GraphEngineEvent]) -> &GraphEngineEvent {
    events.last().expect("at least one event")
}

pub fn count(events: &[GraphEngineEvent], name: &str) -> usize {
    events.iter().filter(|event| event.name() == name).count()
}
