//! End-to-end workflow integration tests.
//!
//! These tests drive whole workflows through the engine, from submission to
//! a terminal status, with dispatchers standing in for real workers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use relay::allocation::TaskAllocator;
use relay::core::{ExecutionMode, TaskStatus, Workflow, WorkflowDefinition, WorkflowStatus};
use relay::execution::{Engine, ExecutionEvent};
use relay::sim::SimulatedWorkers;
use relay::Error;

use crate::fixtures::{chain, drain, engine_with, etl, manual_engine, MockDispatcher};

/// Test: Dependency gating
/// Given A -> B -> C in parallel mode
/// When each task is completed by hand
/// Then the next task is dispatched only after its dependency completes
#[tokio::test]
async fn test_chain_dispatches_after_dependencies() {
    let (engine, mut requests) = manual_engine();
    let (wf, a, b, c) = chain(ExecutionMode::Parallel);

    let handle = engine.submit(wf).await.unwrap();

    for expected in [a, b, c] {
        let request = requests.recv().await.unwrap();
        assert_eq!(request.task_id, expected);
        let snapshot = engine.snapshot(&handle.workflow_id()).await.unwrap();
        assert_eq!(snapshot.task(&expected).unwrap().status, TaskStatus::Running);
        assert_eq!(snapshot.active_count(), 1);
        assert!(requests.try_recv().is_err(), "only one task may run at a time");
        request.reply.complete(json!({})).unwrap();
    }

    let done = handle.wait().await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert!(done.is_complete());
}

/// Test: Fan-out / fan-in with context mapping
/// Given two extract tasks writing context keys and a join reading both
/// When the workflow runs
/// Then the join receives both values and its output lands in the context
#[tokio::test]
async fn test_fan_in_maps_outputs_into_join_input() {
    let dispatcher = Arc::new(
        MockDispatcher::new()
            .completing("users", json!({"count": 3}))
            .completing("orders", json!({"count": 9}))
            .completing("join", json!({"total": 12})),
    );
    let engine = engine_with(dispatcher.clone());

    let mut wf = Workflow::new("fan-in");
    let users = wf
        .add_task(etl("users").with_output("count", "user_count"))
        .unwrap();
    let orders = wf
        .add_task(etl("orders").with_output("count", "order_count"))
        .unwrap();
    wf.add_task(
        etl("join")
            .depends_on(users)
            .depends_on(orders)
            .with_input("users", "user_count")
            .with_input("orders", "order_count")
            .with_output("total", "total"),
    )
    .unwrap();

    let done = engine.run(wf).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Completed);
    let join = &dispatcher.requests_for("join")[0];
    assert_eq!(join.input.get("users"), Some(&json!(3)));
    assert_eq!(join.input.get("orders"), Some(&json!(9)));
    assert_eq!(done.context.get("total"), Some(&json!(12)));
    assert_eq!(dispatcher.dispatched().last().map(String::as_str), Some("join"));
}

/// Test: Concurrent workflows
/// Given several workflows submitted to one engine
/// When they all run
/// Then each completes and the engine forgets them
#[tokio::test]
async fn test_engine_runs_workflows_concurrently() {
    let dispatcher = Arc::new(MockDispatcher::new());
    let engine = engine_with(dispatcher.clone());

    let mut handles = Vec::new();
    for mode in [
        ExecutionMode::Sequential,
        ExecutionMode::Parallel,
        ExecutionMode::Hybrid,
        ExecutionMode::Adaptive,
    ] {
        let (wf, _, _, _) = chain(mode);
        handles.push(engine.submit(wf).await.unwrap());
    }

    for handle in handles {
        let done = assert_ok!(handle.wait().await);
        assert_eq!(done.status, WorkflowStatus::Completed);
    }
    assert_eq!(dispatcher.dispatched().len(), 12);
    assert!(engine.active_workflows().await.is_empty());
}

/// Test: Cycle rejection
/// Given a workflow or definition whose dependencies loop
/// When it is built
/// Then construction fails and nothing runs
#[test]
fn test_cycles_are_rejected_at_construction() {
    let (mut wf, a, _, c) = chain(ExecutionMode::Parallel);
    let err = assert_err!(wf.add_dependency(&a, &c));
    assert!(matches!(err, Error::CycleDetected(_)));
    assert!(wf.task(&a).unwrap().dependencies.is_empty());

    let definition = WorkflowDefinition::from_toml_str(
        r#"
name = "loop"

[[tasks]]
name = "a"
depends_on = ["b"]

[[tasks]]
name = "b"
depends_on = ["a"]
"#,
    )
    .unwrap();
    assert!(matches!(definition.build(), Err(Error::CycleDetected(_))));
}

/// Test: Definition file on simulated workers
/// Given a TOML definition with a retrying task and output mapping
/// When it runs against the simulated worker pool
/// Then it completes and every event is observed in order
#[tokio::test]
async fn test_definition_runs_on_simulated_workers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(
        &path,
        r#"
name = "pipeline"
execution_mode = "sequential"
max_retries = 1

[context]
source = "s3://bucket/raw"

[[tasks]]
name = "extract"
agent_type = "etl"
input = { path = "source" }
output = { path = "raw_path" }

[[tasks]]
name = "report"
agent_type = "report"
depends_on = ["extract"]
input = { from = "raw_path" }
"#,
    )
    .unwrap();

    let wf = WorkflowDefinition::load(&path).unwrap().build().unwrap();
    let workers = SimulatedWorkers::default()
        .with_latency(Duration::from_millis(1))
        .with_failures("extract", 1);
    let directory = SimulatedWorkers::directory_for(&wf, 1);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let engine = Engine::new(TaskAllocator::new(Arc::new(directory)), Arc::new(workers))
        .with_events(events_tx);

    let done = engine.run(wf).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.context.get("raw_path"), Some(&json!("s3://bucket/raw")));
    assert_eq!(done.task_by_name("extract").unwrap().attempts, 2);

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(ExecutionEvent::WorkflowStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::TaskRetrying { retry: 1, .. })));
    assert!(matches!(events.last(), Some(ExecutionEvent::WorkflowCompleted { .. })));
}
