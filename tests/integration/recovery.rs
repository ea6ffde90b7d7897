//! Failure handling and recovery tests.
//!
//! Retries, fallbacks, critical failures, stalls, timeouts and
//! cancellation, observed through the engine's public surface.

use std::sync::Arc;
use std::time::Duration;

use relay::core::{ErrorKind, ExecutionMode, FatalKind, TaskStatus, Workflow, WorkflowStatus};
use relay::execution::ExecutionEvent;
use tokio::sync::mpsc;

use crate::fixtures::{drain, engine_with, etl, manual_engine, MockDispatcher};

/// Test: Retry then fallback
/// Given a task with max_retries = 2 that always fails, and a fallback
/// When the workflow runs
/// Then the task is attempted 3 times and the fallback runs exactly once
#[tokio::test]
async fn test_retries_exhausted_then_fallback_runs_once() {
    let dispatcher = Arc::new(MockDispatcher::new().failing("primary", 3));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let engine = engine_with(dispatcher.clone()).with_events(events_tx);

    let mut wf = Workflow::new("recover");
    let backup = wf.add_task(etl("backup")).unwrap();
    let primary = wf
        .add_task(etl("primary").with_max_retries(2).with_fallback(backup))
        .unwrap();

    let done = engine.run(wf).await.unwrap();

    assert_eq!(dispatcher.dispatched(), vec!["primary", "primary", "primary", "backup"]);
    assert_eq!(done.task(&primary).unwrap().status, TaskStatus::Failed);
    assert_eq!(done.task(&primary).unwrap().attempts, 3);
    assert_eq!(done.task(&backup).unwrap().status, TaskStatus::Completed);
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(
        done.errors.iter().filter(|e| e.kind == ErrorKind::Task).count(),
        3
    );

    let events = drain(&mut events);
    let activations = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::FallbackActivated { .. }))
        .count();
    assert_eq!(activations, 1);
}

/// Test: Unused fallback
/// Given a primary that succeeds
/// When the workflow runs
/// Then its fallback is skipped, never dispatched
#[tokio::test]
async fn test_fallback_skipped_when_primary_succeeds() {
    let dispatcher = Arc::new(MockDispatcher::new());
    let engine = engine_with(dispatcher.clone());

    let mut wf = Workflow::new("no-recovery-needed");
    let backup = wf.add_task(etl("backup")).unwrap();
    wf.add_task(etl("primary").with_fallback(backup)).unwrap();

    let done = engine.run(wf).await.unwrap();

    assert_eq!(dispatcher.dispatched(), vec!["primary"]);
    assert_eq!(done.task(&backup).unwrap().status, TaskStatus::Skipped);
    assert_eq!(done.status, WorkflowStatus::Completed);
}

/// Test: Critical failure
/// Given a critical task that fails without retries
/// When the workflow runs
/// Then the workflow fails with a critical-task error
#[tokio::test]
async fn test_critical_failure_fails_workflow() {
    let dispatcher = Arc::new(MockDispatcher::new().failing("vital", 1));
    let engine = engine_with(dispatcher);

    let mut wf = Workflow::new("critical");
    let vital = wf.add_task(etl("vital").critical()).unwrap();
    wf.add_task(etl("after").depends_on(vital)).unwrap();

    let done = engine.run(wf).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Failed);
    assert_eq!(
        done.fatal_error().map(|e| e.kind),
        Some(ErrorKind::Fatal(FatalKind::CriticalTaskFailed))
    );
}

/// Test: Stall detection
/// Given a non-critical task that fails and a dependent in parallel mode
/// When nothing is left to run
/// Then the workflow fails with a stall instead of hanging
#[tokio::test]
async fn test_parallel_stall_is_detected() {
    let dispatcher = Arc::new(MockDispatcher::new().failing("flaky", 1));
    let engine = engine_with(dispatcher.clone());

    let mut wf = Workflow::new("stall").with_mode(ExecutionMode::Parallel);
    let flaky = wf.add_task(etl("flaky")).unwrap();
    let blocked = wf.add_task(etl("blocked").depends_on(flaky)).unwrap();

    let done = engine.run(wf).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Failed);
    assert_eq!(
        done.fatal_error().map(|e| e.kind),
        Some(ErrorKind::Fatal(FatalKind::Stall))
    );
    assert_eq!(dispatcher.dispatched(), vec!["flaky"]);
    assert_ne!(done.task(&blocked).unwrap().status, TaskStatus::Running);
}

/// Test: Task timeout
/// Given a task whose worker never answers
/// When its timeout elapses
/// Then the attempt fails as a timeout
#[tokio::test(start_paused = true)]
async fn test_silent_worker_times_out() {
    let (engine, mut requests) = manual_engine();
    let mut wf = Workflow::new("slow");
    let slow = wf
        .add_task(etl("slow").with_timeout(Duration::from_secs(2)))
        .unwrap();

    let handle = engine.submit(wf).await.unwrap();
    let request = requests.recv().await.unwrap();
    assert_eq!(request.task_id, slow);

    let done = handle.wait().await.unwrap();

    assert_eq!(done.task(&slow).unwrap().status, TaskStatus::Failed);
    assert!(done.errors.iter().any(|e| e.kind == ErrorKind::Timeout));
    // a late reply for the abandoned attempt goes nowhere
    assert!(request.reply.complete(serde_json::json!({})).is_err());
}

/// Test: Workflow timeout
/// Given a workflow with a deadline and a worker that never answers
/// When the deadline passes
/// Then the workflow fails with a workflow-timeout error
#[tokio::test(start_paused = true)]
async fn test_workflow_deadline_fails_workflow() {
    let (engine, mut requests) = manual_engine();
    let mut wf = Workflow::new("deadline").with_timeout(Duration::from_secs(10));
    wf.add_task(etl("forever")).unwrap();

    let handle = engine.submit(wf).await.unwrap();
    let _request = requests.recv().await.unwrap();

    let done = handle.wait().await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Failed);
    assert_eq!(
        done.fatal_error().map(|e| e.kind),
        Some(ErrorKind::Fatal(FatalKind::WorkflowTimeout))
    );
}

/// Test: Cancellation
/// Given a running workflow
/// When it is cancelled by id
/// Then in-flight and pending tasks are cancelled
#[tokio::test]
async fn test_cancel_stops_running_workflow() {
    let (engine, mut requests) = manual_engine();
    let mut wf = Workflow::new("cancel-me").with_mode(ExecutionMode::Sequential);
    let first = wf.add_task(etl("first")).unwrap();
    let second = wf.add_task(etl("second").depends_on(first)).unwrap();

    let handle = engine.submit(wf).await.unwrap();
    requests.recv().await.unwrap();
    engine.cancel(&handle.workflow_id()).await.unwrap();

    let done = handle.wait().await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Cancelled);
    assert_eq!(done.task(&first).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(done.task(&second).unwrap().status, TaskStatus::Cancelled);
}
