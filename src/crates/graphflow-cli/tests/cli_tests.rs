//! Integration tests for the graphflow CLI commands
//!
//! Graph files, engine configs and snapshots live in temporary directories.

use graphflow_cli::{resume, run, validate, RunOptions};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

fn write_greeting_yaml(dir: &Path) -> PathBuf {
    let path = dir.join("greeting.yaml");
    let yaml = r#"nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - variable: name
          required: true
  - id: answer
    data:
      type: answer
      title: Reply
      answer: "Hello {{#start.name#}}"
edges:
  - source: start
    target: answer
"#;
    fs::write(&path, yaml).expect("Failed to write graph");
    path
}

fn lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect()
}

#[test]
fn test_validate_reports_graph_shape() {
    let dir = create_test_dir();
    let path = write_greeting_yaml(dir.path());

    let summary = validate(&path).unwrap();
    assert_eq!(summary.root_node_id, "start");
    assert_eq!(summary.nodes, 2);
    assert_eq!(summary.edges, 1);
}

#[test]
fn test_validate_rejects_unknown_node_type() {
    let dir = create_test_dir();
    let path = dir.path().join("broken.json");
    fs::write(
        &path,
        r#"{"nodes": [{"id": "start", "data": {"type": "start"}}, {"id": "x", "data": {"type": "teleport"}}],
            "edges": [{"source": "start", "target": "x"}]}"#,
    )
    .unwrap();

    assert!(validate(&path).is_err());
}

#[tokio::test]
async fn test_run_prints_json_lines_and_writes_snapshot() {
    let dir = create_test_dir();
    let graph = write_greeting_yaml(dir.path());
    let snapshots = dir.path().join("snapshots");
    let options = RunOptions {
        graph,
        inputs: Some(r#"{"name": "Ada"}"#.to_string()),
        config: None,
        snapshot_dir: Some(snapshots.clone()),
    };

    let mut output = Vec::new();
    let summary = run(&options, &mut output).await.unwrap();

    assert_eq!(summary.status, "succeeded");
    let responses = lines(&output);
    assert_eq!(responses.first().unwrap()["event"], "workflow_started");
    let last = responses.last().unwrap();
    assert_eq!(last["event"], "workflow_finished");
    assert_eq!(last["data"]["outputs"]["answer"], "Hello Ada");
    assert!(responses
        .iter()
        .all(|response| response["workflow_run_id"] == summary.run_id.as_str()));

    let snapshot = summary.snapshot_path.expect("snapshot written");
    assert!(snapshot.starts_with(&snapshots));
    let document: Value = serde_json::from_str(&fs::read_to_string(snapshot).unwrap()).unwrap();
    assert_eq!(document["version"], "1.0");
}

#[tokio::test]
async fn test_run_fails_on_missing_required_input() {
    let dir = create_test_dir();
    let options = RunOptions {
        graph: write_greeting_yaml(dir.path()),
        ..Default::default()
    };

    let mut output = Vec::new();
    let summary = run(&options, &mut output).await.unwrap();

    assert_eq!(summary.status, "failed");
    let last = lines(&output).pop().unwrap();
    assert!(last["data"]["error"]
        .as_str()
        .unwrap()
        .contains("name is required"));
}

#[tokio::test]
async fn test_run_honours_config_file() {
    let dir = create_test_dir();
    let config = dir.path().join("engine.yaml");
    fs::write(&config, "max_execution_steps: 1\n").unwrap();
    let options = RunOptions {
        graph: write_greeting_yaml(dir.path()),
        inputs: Some(r#"{"name": "Ada"}"#.to_string()),
        config: Some(config),
        snapshot_dir: None,
    };

    let mut output = Vec::new();
    let summary = run(&options, &mut output).await.unwrap();

    assert_eq!(summary.status, "failed");
    let last = lines(&output).pop().unwrap();
    assert_eq!(last["data"]["error"], "Max steps 1 reached.");
}

#[tokio::test]
async fn test_resume_from_written_snapshot() {
    let dir = create_test_dir();
    let graph = write_greeting_yaml(dir.path());
    let options = RunOptions {
        graph: graph.clone(),
        inputs: Some(r#"{"name": "Ada"}"#.to_string()),
        config: None,
        snapshot_dir: Some(dir.path().to_path_buf()),
    };
    let mut first = Vec::new();
    let summary = run(&options, &mut first).await.unwrap();
    let snapshot = summary.snapshot_path.unwrap();

    let resume_options = RunOptions {
        graph,
        ..Default::default()
    };
    let mut second = Vec::new();
    let resumed = resume(&resume_options, &snapshot, &mut second).await.unwrap();

    assert_eq!(resumed.status, "succeeded");
    let last = lines(&second).pop().unwrap();
    assert_eq!(last["event"], "workflow_finished");
}

#[tokio::test]
async fn test_resume_rejects_bad_snapshot() {
    let dir = create_test_dir();
    let snapshot = dir.path().join("bad.json");
    fs::write(&snapshot, r#"{"version": "9.9"}"#).unwrap();
    let options = RunOptions {
        graph: write_greeting_yaml(dir.path()),
        ..Default::default()
    };

    let mut output = Vec::new();
    assert!(resume(&options, &snapshot, &mut output).await.is_err());
    assert!(output.is_empty());
}
