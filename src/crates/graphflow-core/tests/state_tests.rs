//! Runtime state snapshots, pause and resume

mod common;

use common::*;
use graphflow_checkpoint::{InMemorySnapshotStore, SnapshotReason, SnapshotStore};
use graphflow_core::{DefaultCollaborators, GraphEngineEvent, GraphError, GraphRuntimeState, VariablePool};
use serde_json::json;
use std::sync::Arc;

fn approval_workflow() -> Fixture {
    Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "gate", "data": {"type": "gate", "title": "Wait for approval"}},
            {"id": "answer", "data": {"type": "answer", "answer": "Approved: {{#gate.approved#}}"}}
        ],
        "edges": [
            {"source": "start", "target": "gate"},
            {"source": "gate", "target": "answer"}
        ]
    }))
}

#[tokio::test]
async fn test_dumps_loads_reproduces_run_state() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "llm", "data": {"type": "echo", "outputs": {"text": "hello"}, "tokens": 9}},
            {"id": "answer", "data": {"type": "answer", "answer": "{{#llm.text#}}"}}
        ],
        "edges": [
            {"source": "start", "target": "llm"},
            {"source": "llm", "target": "answer"}
        ]
    }));
    let (_, state) = fixture.run(VariablePool::empty()).await;

    let data = state.dumps().unwrap();
    let restored = GraphRuntimeState::from_snapshot(&data, Arc::new(DefaultCollaborators)).unwrap();

    assert_eq!(restored.total_tokens(), 9);
    assert_eq!(restored.node_run_steps(), 3);
    assert_eq!(restored.outputs(), state.outputs());
    assert_eq!(
        restored.variable_pool().get(&["llm", "text"]).unwrap().to_value(),
        json!("hello")
    );
    let document: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert_eq!(document["version"], json!("1.0"));
}

#[tokio::test]
async fn test_unknown_snapshot_version_rejected() {
    let err = GraphRuntimeState::from_snapshot(
        r#"{"version": "9.9", "total_tokens": 0}"#,
        Arc::new(DefaultCollaborators),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedSnapshotVersion(v) if v == "9.9"));
}

#[tokio::test]
async fn test_pause_then_resume_from_snapshot() {
    let fixture = approval_workflow();
    let store: Arc<InMemorySnapshotStore> = Arc::new(InMemorySnapshotStore::new());

    let state = Arc::new(GraphRuntimeState::new(VariablePool::empty()));
    let engine = fixture
        .engine(state)
        .with_snapshot_store(store.clone(), "run-1");
    let first = collect(engine).await;

    match terminal(&first) {
        GraphEngineEvent::GraphRunPaused { paused_nodes, .. } => {
            assert_eq!(paused_nodes, &vec!["gate".to_string()]);
        }
        other => panic!("unexpected terminal event {}", other.name()),
    }
    assert_eq!(count(&first, "node_run_paused"), 1);
    assert_eq!(streamed_text(&first), "Approved: ");

    let snapshot = store.latest("run-1").await.unwrap().expect("snapshot stored");
    assert_eq!(snapshot.metadata.reason, SnapshotReason::Paused);

    let restored = GraphRuntimeState::restore(store.as_ref(), "run-1", Arc::new(DefaultCollaborators))
        .await
        .unwrap();
    restored
        .variable_pool_mut()
        .add(&["approval", "granted"], true)
        .unwrap();
    let restored = Arc::new(restored);
    let second = collect(fixture.engine(restored.clone())).await;

    assert_eq!(started_nodes(&second), vec!["gate", "answer"]);
    assert_eq!(streamed_text(&second), "true");
    assert_eq!(terminal(&second).name(), "graph_run_succeeded");
    assert_eq!(restored.node_run_steps(), 4);
    assert!(restored.paused_nodes().is_empty());
}

#[tokio::test]
async fn test_completed_run_stores_snapshot() {
    let fixture = Fixture::new(json!({
        "nodes": [{"id": "start", "data": {"type": "start"}}],
        "edges": []
    }));
    let store = Arc::new(InMemorySnapshotStore::new());
    let state = Arc::new(GraphRuntimeState::new(VariablePool::empty()));

    let events = collect(fixture.engine(state).with_snapshot_store(store.clone(), "run-2")).await;

    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    let snapshot = store.latest("run-2").await.unwrap().expect("snapshot stored");
    assert_eq!(snapshot.metadata.reason, SnapshotReason::Completed);
    assert_eq!(snapshot.metadata.node_run_steps, 1);
}

#[tokio::test]
async fn test_state_attaches_to_one_graph_only() {
    let fixture = approval_workflow();
    let state = Arc::new(GraphRuntimeState::new(VariablePool::empty()));
    let _engine = fixture.engine(state.clone());

    let other = graphflow_core::GraphEngine::new(fixture.graph(), state, fixture.run_context());
    assert!(other.is_err());
}
