//! # graphflow-cli
//!
//! Commands behind the `graphflow` binary. Each one loads a graph definition from JSON or YAML
//! and runs it with the built-in node types.

use anyhow::{Context, Result};
use futures::StreamExt;
use graphflow_core::{
    DefaultCollaborators, EngineConfig, Graph, GraphConfig, GraphEngine, GraphRuntimeState,
    NodeRegistry, RunContext, SystemVariables, VariablePool,
};
use graphflow_pipeline::{
    InMemoryRepository, Repositories, ResponseEvent, WorkflowTaskPipeline,
};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Shape of a validated graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSummary {
    pub root_node_id: String,
    pub nodes: usize,
    pub edges: usize,
}

/// Settings shared by `run` and `resume`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub graph: PathBuf,
    /// JSON object of user inputs
    pub inputs: Option<String>,
    pub config: Option<PathBuf>,
    /// Directory the final snapshot is written to
    pub snapshot_dir: Option<PathBuf>,
}

/// What a finished `run` or `resume` reports
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: String,
    pub snapshot_path: Option<PathBuf>,
}

pub fn load_graph(path: &Path) -> Result<GraphConfig> {
    GraphConfig::from_file(path)
        .with_context(|| format!("Failed to load graph definition {}", path.display()))
}

/// Parse `path` and build the graph it describes
pub fn validate(path: &Path) -> Result<GraphSummary> {
    let config = load_graph(path)?;
    let registry = NodeRegistry::with_builtins();
    let graph = Graph::init(&config, &registry, None)
        .with_context(|| format!("Invalid graph {}", path.display()))?;
    Ok(GraphSummary {
        root_node_id: graph.root_node_id().to_string(),
        nodes: graph.node_ids().len(),
        edges: graph.edges().count(),
    })
}

/// Run the graph from its start node, writing one JSON response per line to `out`
pub async fn run<W: Write>(options: &RunOptions, out: &mut W) -> Result<RunSummary> {
    let inputs = parse_inputs(options.inputs.as_deref())?;
    let run_id = Uuid::new_v4().to_string();
    let pool = VariablePool::builder()
        .user_inputs(inputs)
        .system_variables(SystemVariables::default().with_workflow_run_id(&run_id))
        .build();
    let state = GraphRuntimeState::new(pool);
    execute(options, state, out).await
}

/// Continue from a snapshot file; `--inputs` values are added to the restored pool
pub async fn resume<W: Write>(
    options: &RunOptions,
    snapshot: &Path,
    out: &mut W,
) -> Result<RunSummary> {
    let data = std::fs::read_to_string(snapshot)
        .with_context(|| format!("Failed to read snapshot {}", snapshot.display()))?;
    let state = GraphRuntimeState::from_snapshot(&data, Arc::new(DefaultCollaborators))
        .with_context(|| format!("Failed to restore snapshot {}", snapshot.display()))?;

    let extra = parse_inputs(options.inputs.as_deref())?;
    {
        let mut pool = state.variable_pool_mut();
        for (key, value) in extra {
            let selector: Vec<&str> = key.split('.').collect();
            pool.add(&selector, value)
                .with_context(|| format!("Invalid input selector '{}'", key))?;
        }
    }
    execute(options, state, out).await
}

async fn execute<W: Write>(
    options: &RunOptions,
    state: GraphRuntimeState,
    out: &mut W,
) -> Result<RunSummary> {
    let engine_config = match &options.config {
        Some(path) => EngineConfig::from_file(path)
            .and_then(EngineConfig::with_env_overrides)
            .with_context(|| format!("Failed to load engine config {}", path.display()))?,
        None => EngineConfig::from_env().context("Invalid engine settings in environment")?,
    };

    let config = Arc::new(load_graph(&options.graph)?);
    let registry = Arc::new(NodeRegistry::with_builtins());
    let graph = Arc::new(
        Graph::init(&config, registry.as_ref(), None)
            .with_context(|| format!("Invalid graph {}", options.graph.display()))?,
    );
    let context = RunContext::new(config, registry)
        .with_workflow_id(workflow_id(&options.graph))
        .with_config(engine_config);
    let state = Arc::new(state);
    let engine = GraphEngine::new(graph, state.clone(), Arc::new(context))?;

    let store = Arc::new(InMemoryRepository::new());
    let pipeline = WorkflowTaskPipeline::new(engine, Repositories::from_store(store));
    let run_id = pipeline.run_id().to_string();
    tracing::info!(run_id = %run_id, graph = %options.graph.display(), "Starting run");

    let mut status = String::from("failed");
    let mut responses = pipeline.process_stream();
    while let Some(response) = responses.next().await {
        if let ResponseEvent::WorkflowFinished(data) = &response.event {
            status = data.status.clone();
        }
        serde_json::to_writer(&mut *out, &response)?;
        writeln!(out)?;
    }
    out.flush()?;

    let snapshot_path = match &options.snapshot_dir {
        Some(dir) => Some(write_snapshot(&state, dir, &run_id)?),
        None => None,
    };

    Ok(RunSummary {
        run_id,
        status,
        snapshot_path,
    })
}

fn write_snapshot(state: &GraphRuntimeState, dir: &Path, run_id: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;
    let path = dir.join(format!("{}.json", run_id));
    std::fs::write(&path, state.dumps()?)
        .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
    tracing::info!(path = %path.display(), "Snapshot written");
    Ok(path)
}

fn parse_inputs(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw).context("--inputs is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--inputs must be a JSON object, got {}", other),
    }
}

fn workflow_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("workflow")
        .to_string()
}
