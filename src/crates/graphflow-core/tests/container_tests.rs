//! Iteration and loop nodes running their bodies through nested engines

mod common;

use common::*;
use graphflow_core::{GraphEngineEvent, VariablePool};
use serde_json::{json, Value};

fn iteration_workflow(node: Value) -> Fixture {
    let mut data = json!({
        "type": "iteration",
        "title": "Each item",
        "iterator_selector": ["start", "items"],
        "output_selector": ["dbl", "value"],
        "start_node_id": "it_start"
    });
    if let (Some(data), Some(extra)) = (data.as_object_mut(), node.as_object()) {
        data.extend(extra.clone());
    }
    Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "it", "data": data},
            {"id": "it_start", "data": {"type": "iteration-start", "iteration_id": "it"}},
            {"id": "dbl", "data": {"type": "double", "iteration_id": "it", "source": ["it", "item"], "fail_on": 2}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "result", "value_selector": ["it", "output"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "it"},
            {"source": "it", "target": "end"},
            {"source": "it_start", "target": "dbl"}
        ]
    }))
}

fn iteration_output(events: &[GraphEngineEvent]) -> Option<Value> {
    events.iter().find_map(|event| match event {
        GraphEngineEvent::IterationSucceeded { outputs, .. } => outputs.get("output").cloned(),
        _ => None,
    })
}

#[tokio::test]
async fn test_sequential_iteration_terminates_on_first_failure() {
    let fixture = iteration_workflow(json!({"error_handle_mode": "terminated"}));

    let (events, state) = fixture.run(pool_with_inputs(json!({"items": [1, 2, 3]}))).await;

    assert_eq!(count(&events, "iteration_failed"), 1);
    assert_eq!(count(&events, "iteration_succeeded"), 0);
    let failed_outputs = events.iter().find_map(|event| match event {
        GraphEngineEvent::IterationFailed { outputs, error, .. } => {
            Some((outputs["output"].clone(), error.clone()))
        }
        _ => None,
    });
    assert_eq!(
        failed_outputs,
        Some((json!([2]), "cannot double 2".to_string()))
    );
    match terminal(&events) {
        GraphEngineEvent::GraphRunFailed { error, .. } => assert_eq!(error, "cannot double 2"),
        other => panic!("unexpected terminal event {}", other.name()),
    }
    assert!(state.variable_pool().get(&["it", "item"]).is_none());
    assert!(state.variable_pool().get(&["it", "index"]).is_none());
}

#[tokio::test]
async fn test_sequential_iteration_continue_on_error_keeps_null_slot() {
    let fixture = iteration_workflow(json!({"error_handle_mode": "continue-on-error"}));

    let (events, state) = fixture.run(pool_with_inputs(json!({"items": [1, 2, 3]}))).await;

    assert_eq!(iteration_output(&events), Some(json!([2, null, 6])));
    assert_eq!(count(&events, "iteration_next"), 3);
    assert_eq!(state.get_output("result"), Some(json!([2, null, 6])));
    assert!(state.variable_pool().get(&["dbl", "value"]).is_none());
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
}

#[tokio::test]
async fn test_sequential_iteration_remove_abnormal_output() {
    let fixture = iteration_workflow(json!({"error_handle_mode": "remove-abnormal-output"}));

    let (events, _) = fixture.run(pool_with_inputs(json!({"items": [1, 2, 3]}))).await;

    assert_eq!(iteration_output(&events), Some(json!([2, 6])));
}

#[tokio::test]
async fn test_body_events_are_tagged_with_iteration() {
    let fixture = iteration_workflow(json!({"error_handle_mode": "continue-on-error"}));

    let (events, _) = fixture.run(pool_with_inputs(json!({"items": [4, 5]}))).await;

    let body_indices: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::NodeRunSucceeded { info, .. } if info.node_id == "dbl" => {
                assert_eq!(info.in_iteration_id.as_deref(), Some("it"));
                info.iteration_index
            }
            _ => None,
        })
        .collect();
    assert_eq!(body_indices, vec![0, 1]);
    assert!(!started_nodes(&events).contains(&"dbl".to_string()));
}

#[tokio::test]
async fn test_empty_iterator_succeeds_immediately() {
    let fixture = iteration_workflow(json!({}));

    let (events, state) = fixture.run(pool_with_inputs(json!({"items": []}))).await;

    assert_eq!(count(&events, "iteration_started"), 0);
    assert_eq!(state.get_output("result"), Some(json!([])));
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
}

#[tokio::test]
async fn test_non_list_iterator_fails_the_node() {
    let fixture = iteration_workflow(json!({}));

    let (events, _) = fixture.run(pool_with_inputs(json!({"items": "abc"}))).await;

    let failed = events.iter().find_map(|event| match event {
        GraphEngineEvent::NodeRunFailed { info, result, .. } if info.node_id == "it" => {
            result.error_type.clone()
        }
        _ => None,
    });
    assert_eq!(failed.as_deref(), Some("IterationNodeError"));
    assert_eq!(terminal(&events).name(), "graph_run_failed");
}

#[tokio::test]
async fn test_parallel_iteration_keeps_slot_order() {
    let fixture = iteration_workflow(json!({
        "is_parallel": true,
        "parallel_nums": 2,
        "error_handle_mode": "continue-on-error"
    }));

    let (events, state) = fixture
        .run(pool_with_inputs(json!({"items": [1, 3, 4, 5, 6]})))
        .await;

    assert_eq!(count(&events, "iteration_next"), 5);
    assert_eq!(count(&events, "iteration_succeeded"), 1);
    assert_eq!(state.get_output("result"), Some(json!([2, 6, 8, 10, 12])));
    for event in &events {
        if let Some(info) = event.node_info() {
            if info.node_id == "dbl" {
                assert!(info.parallel_mode_run_id.is_some());
            }
        }
    }
}

#[tokio::test]
async fn test_parallel_iteration_terminates_on_failure() {
    let fixture = iteration_workflow(json!({
        "is_parallel": true,
        "parallel_nums": 1,
        "error_handle_mode": "terminated"
    }));

    let (events, state) = fixture.run(pool_with_inputs(json!({"items": [1, 2, 3]}))).await;

    assert_eq!(count(&events, "iteration_failed"), 1);
    assert_eq!(count(&events, "iteration_succeeded"), 0);
    assert_eq!(terminal(&events).name(), "graph_run_failed");
    assert!(state.variable_pool().get(&["it", "item"]).is_none());
}

#[tokio::test]
async fn test_iteration_merges_body_token_usage() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "it", "data": {
                "type": "iteration",
                "iterator_selector": ["start", "items"],
                "output_selector": ["llm", "text"],
                "start_node_id": "it_start",
                "is_parallel": true
            }},
            {"id": "it_start", "data": {"type": "iteration-start"}},
            {"id": "llm", "data": {"type": "echo", "outputs": {"text": "ok"}, "tokens": 4}}
        ],
        "edges": [
            {"source": "start", "target": "it"},
            {"source": "it_start", "target": "llm"}
        ]
    }));

    let (events, state) = fixture.run(pool_with_inputs(json!({"items": ["a", "b", "c"]}))).await;

    assert_eq!(iteration_output(&events), Some(json!(["ok", "ok", "ok"])));
    assert_eq!(state.total_tokens(), 12);
}

fn loop_workflow(loop_count: u64) -> Fixture {
    Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "lp", "data": {
                "type": "loop",
                "loop_count": loop_count,
                "start_node_id": "lp_start",
                "loop_variables": [{"label": "count", "value_type": "constant", "value": 0}],
                "break_conditions": [
                    {"variable_selector": ["lp", "count"], "comparison_operator": "≥", "value": 3}
                ],
                "logical_operator": "and"
            }},
            {"id": "lp_start", "data": {"type": "loop-start", "loop_id": "lp"}},
            {"id": "inc", "data": {"type": "increment", "loop_id": "lp", "target": ["lp", "count"]}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "count", "value_selector": ["lp", "count"]},
                {"variable": "rounds", "value_selector": ["lp", "loop_round"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "lp"},
            {"source": "lp", "target": "end"},
            {"source": "lp_start", "target": "inc"}
        ]
    }))
}

#[tokio::test]
async fn test_loop_stops_on_break_condition() {
    let (events, state) = loop_workflow(10).run(VariablePool::empty()).await;

    assert_eq!(count(&events, "loop_started"), 1);
    assert_eq!(count(&events, "loop_next"), 3);
    assert_eq!(count(&events, "loop_succeeded"), 1);
    assert_eq!(state.get_output("count"), Some(json!(3)));
    assert_eq!(state.get_output("rounds"), Some(json!(3)));
    for event in &events {
        if let GraphEngineEvent::NodeRunStarted { info } = event {
            if info.node_id == "inc" {
                assert_eq!(info.in_loop_id.as_deref(), Some("lp"));
            }
        }
    }
}

#[tokio::test]
async fn test_loop_stops_at_loop_count() {
    let (events, state) = loop_workflow(2).run(VariablePool::empty()).await;

    assert_eq!(count(&events, "loop_next"), 2);
    assert_eq!(state.get_output("count"), Some(json!(2)));
    assert_eq!(state.get_output("rounds"), Some(json!(2)));
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
}
