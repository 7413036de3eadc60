//! End-to-end runs of the graph engine over small workflows

mod common;

use common::*;
use graphflow_core::{command_channel, EngineConfig, GraphEngineEvent, NodeRunStatus, VariablePool};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_answer_streams_in_template_order() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start", "title": "Start"}},
            {"id": "answer", "data": {"type": "answer", "title": "Reply", "answer": "Hi {{#start.name#}}!"}}
        ],
        "edges": [{"source": "start", "target": "answer"}]
    }));

    let (events, state) = fixture.run(pool_with_inputs(json!({"name": "Ada"}))).await;

    assert_eq!(names(&events).first(), Some(&"graph_run_started"));
    match terminal(&events) {
        GraphEngineEvent::GraphRunSucceeded { outputs } => {
            assert_eq!(outputs["answer"], json!("Hi Ada!"));
        }
        other => panic!("unexpected terminal event {}", other.name()),
    }
    assert_eq!(streamed_text(&events), "Hi Ada!");
    assert_eq!(state.node_run_steps(), 2);
    assert_eq!(count(&events, "graph_run_succeeded"), 1);
}

#[tokio::test]
async fn test_if_else_skips_untaken_branch() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "check", "data": {"type": "if-else", "cases": [
                {"case_id": "true", "logical_operator": "and", "conditions": [
                    {"variable_selector": ["start", "flag"], "comparison_operator": "is", "value": "yes"}
                ]}
            ]}},
            {"id": "yes", "data": {"type": "answer", "answer": "Yes"}},
            {"id": "no", "data": {"type": "answer", "answer": "No"}}
        ],
        "edges": [
            {"source": "start", "target": "check"},
            {"source": "check", "sourceHandle": "true", "target": "yes"},
            {"source": "check", "sourceHandle": "false", "target": "no"}
        ]
    }));

    let (events, _) = fixture.run(pool_with_inputs(json!({"flag": "no"}))).await;

    assert_eq!(streamed_text(&events), "No");
    let started = started_nodes(&events);
    assert!(started.contains(&"no".to_string()));
    assert!(!started.contains(&"yes".to_string()));
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
}

#[tokio::test]
async fn test_skip_propagates_to_join_with_one_live_input() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "check", "data": {"type": "if-else", "cases": [
                {"case_id": "true", "conditions": [
                    {"variable_selector": ["start", "n"], "comparison_operator": ">", "value": 10}
                ]}
            ]}},
            {"id": "big", "data": {"type": "echo", "outputs": {"label": "big"}}},
            {"id": "small", "data": {"type": "echo", "outputs": {"label": "small"}}},
            {"id": "after_big", "data": {"type": "echo", "outputs": {}}},
            {"id": "join", "data": {"type": "echo", "outputs": {"joined": true}}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "joined", "value_selector": ["join", "joined"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "check"},
            {"source": "check", "sourceHandle": "true", "target": "big"},
            {"source": "check", "sourceHandle": "false", "target": "small"},
            {"source": "big", "target": "after_big"},
            {"source": "after_big", "target": "join"},
            {"source": "small", "target": "join"},
            {"source": "join", "target": "end"}
        ]
    }));

    let (events, _) = fixture.run(pool_with_inputs(json!({"n": 3}))).await;

    let started = started_nodes(&events);
    assert_eq!(started, vec!["start", "check", "small", "join", "end"]);
    match terminal(&events) {
        GraphEngineEvent::GraphRunSucceeded { outputs } => {
            assert_eq!(outputs["joined"], json!(true));
        }
        other => panic!("unexpected terminal event {}", other.name()),
    }
}

#[tokio::test]
async fn test_parallel_branches_report_start_and_finish() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "left", "data": {"type": "sleep", "ms": 20}},
            {"id": "right", "data": {"type": "sleep", "ms": 5}},
            {"id": "end", "data": {"type": "end", "outputs": []}}
        ],
        "edges": [
            {"source": "start", "target": "left"},
            {"source": "start", "target": "right"},
            {"source": "left", "target": "end"},
            {"source": "right", "target": "end"}
        ]
    }));

    let (events, _) = fixture.run(VariablePool::empty()).await;

    assert_eq!(count(&events, "parallel_branch_run_started"), 2);
    assert_eq!(count(&events, "parallel_branch_run_succeeded"), 2);
    for event in &events {
        if let GraphEngineEvent::NodeRunStarted { info } = event {
            if info.node_id == "left" || info.node_id == "right" {
                assert!(info.parallel_id.is_some());
                assert_eq!(info.parallel_start_node_id.as_deref(), Some(info.node_id.as_str()));
            }
        }
    }
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
}

#[tokio::test]
async fn test_retry_reuses_execution_and_recovers() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "flaky", "data": {
                "type": "flaky",
                "fail_times": 2,
                "retry_config": {"retry_enabled": true, "max_retries": 2, "retry_interval": 5}
            }}
        ],
        "edges": [{"source": "start", "target": "flaky"}]
    }));

    let (events, state) = fixture.run(VariablePool::empty()).await;

    assert_eq!(count(&events, "node_run_retry"), 2);
    let started_ids: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::NodeRunStarted { info } if info.node_id == "flaky" => {
                Some(info.id.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(started_ids.len(), 1);
    for event in &events {
        if let GraphEngineEvent::NodeRunRetry { info, .. } = event {
            assert_eq!(info.id, started_ids[0]);
        }
    }

    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    assert_eq!(
        state.variable_pool().get(&["flaky", "attempts"]).unwrap().to_value(),
        json!(3)
    );
    assert_eq!(state.node_run_steps(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "flaky", "data": {
                "type": "flaky",
                "fail_times": 5,
                "retry_config": {"retry_enabled": true, "max_retries": 1, "retry_interval": 1}
            }},
            {"id": "answer", "data": {"type": "answer", "answer": "unreachable"}}
        ],
        "edges": [
            {"source": "start", "target": "flaky"},
            {"source": "flaky", "target": "answer"}
        ]
    }));

    let (events, _) = fixture.run(VariablePool::empty()).await;

    assert_eq!(count(&events, "node_run_retry"), 1);
    assert_eq!(count(&events, "node_run_failed"), 1);
    assert!(!started_nodes(&events).contains(&"answer".to_string()));
    match terminal(&events) {
        GraphEngineEvent::GraphRunFailed { error, .. } => assert_eq!(error, "attempt 1 failed"),
        other => panic!("unexpected terminal event {}", other.name()),
    }
}

#[tokio::test]
async fn test_fail_branch_routes_errors() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "flaky", "data": {"type": "flaky", "fail_times": 9, "error_strategy": "fail-branch"}},
            {"id": "ok", "data": {"type": "answer", "answer": "fine"}},
            {"id": "oops", "data": {"type": "answer", "answer": "error: {{#flaky.error_message#}}"}}
        ],
        "edges": [
            {"source": "start", "target": "flaky"},
            {"source": "flaky", "target": "ok"},
            {"source": "flaky", "sourceHandle": "fail-branch", "target": "oops"}
        ]
    }));

    let (events, _) = fixture.run(VariablePool::empty()).await;

    assert_eq!(count(&events, "node_run_exception"), 1);
    assert_eq!(streamed_text(&events), "error: attempt 0 failed");
    assert!(!started_nodes(&events).contains(&"ok".to_string()));
    match terminal(&events) {
        GraphEngineEvent::GraphRunPartialSucceeded {
            exceptions_count,
            outputs,
        } => {
            assert_eq!(*exceptions_count, 1);
            assert_eq!(outputs["answer"], json!("error: attempt 0 failed"));
        }
        other => panic!("unexpected terminal event {}", other.name()),
    }
}

#[tokio::test]
async fn test_default_value_strategy_continues() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "flaky", "data": {
                "type": "flaky",
                "fail_times": 9,
                "error_strategy": "default-value",
                "default_value": [{"key": "text", "type": "string", "value": "fallback"}]
            }},
            {"id": "answer", "data": {"type": "answer", "answer": "{{#flaky.text#}}"}}
        ],
        "edges": [
            {"source": "start", "target": "flaky"},
            {"source": "flaky", "target": "answer"}
        ]
    }));

    let (events, state) = fixture.run(VariablePool::empty()).await;

    let exception = events.iter().find_map(|event| match event {
        GraphEngineEvent::NodeRunException { result, .. } => Some(result.clone()),
        _ => None,
    });
    let exception = exception.expect("exception event");
    assert_eq!(exception.status, NodeRunStatus::Exception);
    assert_eq!(exception.outputs["error_type"], json!("FlakyError"));
    assert_eq!(state.get_output("answer"), Some(json!("fallback")));
    assert_eq!(terminal(&events).name(), "graph_run_partial_succeeded");
}

#[tokio::test]
async fn test_abort_drains_running_nodes() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "slow", "data": {"type": "sleep", "ms": 200}},
            {"id": "answer", "data": {"type": "answer", "answer": "never"}}
        ],
        "edges": [
            {"source": "start", "target": "slow"},
            {"source": "slow", "target": "answer"}
        ]
    }));
    let (sender, receiver) = command_channel();
    let state = std::sync::Arc::new(graphflow_core::GraphRuntimeState::new(VariablePool::empty()));
    let engine = fixture.engine(state).with_command_channel(receiver);

    let abort = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.abort(Some("user stop".into())).unwrap();
    });
    let events = collect(engine).await;
    abort.await.unwrap();

    assert!(events.iter().any(|event| matches!(
        event,
        GraphEngineEvent::NodeRunSucceeded { info, .. } if info.node_id == "slow"
    )));
    assert!(!started_nodes(&events).contains(&"answer".to_string()));
    match terminal(&events) {
        GraphEngineEvent::GraphRunAborted { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("user stop"));
        }
        other => panic!("unexpected terminal event {}", other.name()),
    }
}

#[tokio::test]
async fn test_step_budget_fails_the_run() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "a", "data": {"type": "echo", "outputs": {}}},
            {"id": "b", "data": {"type": "echo", "outputs": {}}},
            {"id": "c", "data": {"type": "echo", "outputs": {}}}
        ],
        "edges": [
            {"source": "start", "target": "a"},
            {"source": "a", "target": "b"},
            {"source": "b", "target": "c"}
        ]
    }))
    .with_engine_config(EngineConfig::default().with_max_execution_steps(2));

    let (events, state) = fixture.run(VariablePool::empty()).await;

    assert_eq!(started_nodes(&events), vec!["start", "a"]);
    assert_eq!(state.node_run_steps(), 2);
    match terminal(&events) {
        GraphEngineEvent::GraphRunFailed { error, .. } => assert_eq!(error, "Max steps 2 reached."),
        other => panic!("unexpected terminal event {}", other.name()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_fails_the_run() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "slow", "data": {"type": "sleep", "ms": 5000}}
        ],
        "edges": [{"source": "start", "target": "slow"}]
    }))
    .with_engine_config(EngineConfig::default().with_max_execution_time(Duration::from_secs(1)));

    let (events, _) = fixture.run(VariablePool::empty()).await;

    match terminal(&events) {
        GraphEngineEvent::GraphRunFailed { error, .. } => {
            assert_eq!(error, "Max execution time 1s reached.");
        }
        other => panic!("unexpected terminal event {}", other.name()),
    }
}

#[tokio::test]
async fn test_token_usage_accumulates() {
    let fixture = Fixture::new(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "a", "data": {"type": "echo", "outputs": {}, "tokens": 7}},
            {"id": "b", "data": {"type": "echo", "outputs": {}, "tokens": 5}}
        ],
        "edges": [
            {"source": "start", "target": "a"},
            {"source": "a", "target": "b"}
        ]
    }));

    let (_, state) = fixture.run(VariablePool::empty()).await;
    assert_eq!(state.total_tokens(), 12);
    assert_eq!(state.llm_usage().total_tokens, 12);
}

#[tokio::test]
async fn test_call_depth_limit_rejected_at_setup() {
    let fixture = Fixture::new(json!({
        "nodes": [{"id": "start", "data": {"type": "start"}}],
        "edges": []
    }));
    let context = std::sync::Arc::new(
        graphflow_core::RunContext::new(fixture.config.clone(), fixture.registry.clone())
            .with_call_depth(6),
    );
    let state = std::sync::Arc::new(graphflow_core::GraphRuntimeState::new(VariablePool::empty()));

    let err = graphflow_core::GraphEngine::new(fixture.graph(), state, context)
        .err()
        .expect("depth over the limit");
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_oversized_time_budget_rejected_at_setup() {
    let fixture = Fixture::new(json!({
        "nodes": [{"id": "start", "data": {"type": "start"}}],
        "edges": []
    }))
    .with_engine_config(
        EngineConfig::default().with_max_execution_time(Duration::from_secs(u64::MAX)),
    );
    let state = std::sync::Arc::new(graphflow_core::GraphRuntimeState::new(VariablePool::empty()));

    let err = graphflow_core::GraphEngine::new(fixture.graph(), state, fixture.run_context())
        .err()
        .expect("time budget over the limit");
    assert!(err.is_configuration());
}
