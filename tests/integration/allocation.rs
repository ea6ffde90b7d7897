//! Worker allocation tests.
//!
//! Strategies are exercised through the allocator, and through the engine
//! where the choice of worker matters to a running workflow.

use std::collections::HashSet;
use std::sync::Arc;

use relay::allocation::{AllocationConstraints, TaskAllocator};
use relay::core::{ExecutionMode, TaskStatus, WorkerDirectory, Workflow, WorkflowStatus};
use relay::execution::Engine;

use crate::fixtures::{etl, worker, worker_pool, MockDispatcher};

/// Test: Market exclusivity
/// Given one worker limited to one task and two tasks up for auction
/// When the market strategy allocates both in one call
/// Then exactly one task wins the worker
#[test]
fn test_market_grants_single_worker_once() {
    let registry = WorkerDirectory::new().with_worker("solo", "etl");
    let constraints = AllocationConstraints {
        max_tasks_per_agent: Some(1),
        ..Default::default()
    };
    let mut allocator = TaskAllocator::new(Arc::new(registry)).with_constraints(constraints);

    let mut wf = Workflow::new("auction");
    let low = wf.add_task(etl("low").with_priority(2)).unwrap();
    let high = wf.add_task(etl("high").with_priority(9)).unwrap();

    let allocations = allocator
        .allocate(&wf, &[low, high], Some("market"), None)
        .unwrap();

    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].task_id, high);
    assert_eq!(allocations[0].worker_id, worker("solo"));
    assert_eq!(allocations[0].strategy, "market");
}

/// Test: Market exclusivity at equal priority
/// Given one worker limited to one task and two tasks of equal priority
/// When the market strategy allocates both in one call
/// Then only the first-inserted task wins the worker
#[test]
fn test_market_equal_priority_keeps_insertion_order() {
    let registry = WorkerDirectory::new().with_worker("solo", "etl");
    let constraints = AllocationConstraints {
        max_tasks_per_agent: Some(1),
        ..Default::default()
    };
    let mut allocator = TaskAllocator::new(Arc::new(registry)).with_constraints(constraints);

    let mut wf = Workflow::new("tie");
    let first = wf.add_task(etl("first").with_priority(5)).unwrap();
    let second = wf.add_task(etl("second").with_priority(5)).unwrap();

    let allocations = allocator
        .allocate(&wf, &[first, second], Some("market"), None)
        .unwrap();

    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].task_id, first);
    assert_eq!(allocations[0].worker_id, worker("solo"));
}

/// Test: Round-robin spread
/// Given two etl workers
/// When four tasks are allocated round-robin
/// Then both workers receive work
#[test]
fn test_round_robin_uses_whole_pool() {
    let mut allocator = TaskAllocator::new(Arc::new(worker_pool()));
    let mut wf = Workflow::new("spread");
    let ids: Vec<_> = (0..4)
        .map(|i| wf.add_task(etl(&format!("t{i}"))).unwrap())
        .collect();

    let allocations = allocator
        .allocate(&wf, &ids, Some("round_robin"), None)
        .unwrap();

    assert_eq!(allocations.len(), 4);
    let used: HashSet<_> = allocations.iter().map(|a| a.worker_id.clone()).collect();
    assert_eq!(used.len(), 2);
    assert!(!used.contains(&worker("report-1")));
}

/// Test: Unknown strategy
/// Given an allocator
/// When a call names a strategy that does not exist
/// Then it is a configuration error
#[test]
fn test_unknown_strategy_is_configuration_error() {
    let mut allocator = TaskAllocator::new(Arc::new(worker_pool()));
    let mut wf = Workflow::new("wf");
    let id = wf.add_task(etl("t")).unwrap();

    let err = allocator.allocate(&wf, &[id], Some("lottery"), None).unwrap_err();
    assert!(matches!(err, relay::Error::Configuration(_)));
}

/// Test: Allocation through the engine
/// Given an engine using round-robin and a parallel fan-out
/// When the workflow runs
/// Then every task records the worker it ran on, from the right pool
#[tokio::test]
async fn test_engine_records_assigned_workers() {
    let dispatcher = Arc::new(MockDispatcher::new());
    let engine = Engine::new(TaskAllocator::new(Arc::new(worker_pool())), dispatcher)
        .with_allocation_strategy("round_robin");

    let mut wf = Workflow::new("fan-out").with_mode(ExecutionMode::Parallel);
    for i in 0..4 {
        wf.add_task(etl(&format!("part-{i}"))).unwrap();
    }
    wf.add_task(relay::core::Task::new("summary", "").with_agent_type("report"))
        .unwrap();

    let done = engine.run(wf).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Completed);
    for task in done.tasks() {
        assert_eq!(task.status, TaskStatus::Completed);
        let assigned = task.assigned_worker.clone().unwrap();
        if task.name == "summary" {
            assert_eq!(assigned, worker("report-1"));
        } else {
            assert!(assigned.as_str().starts_with("etl-"));
        }
    }
}

/// Test: Explicit worker
/// Given a task pinned to a worker that is not registered
/// When the workflow runs
/// Then the task fails with a configuration error and is not retried
#[tokio::test]
async fn test_pinned_unknown_worker_is_not_retried() {
    let dispatcher = Arc::new(MockDispatcher::new());
    let engine = Engine::new(TaskAllocator::new(Arc::new(worker_pool())), dispatcher.clone());

    let mut wf = Workflow::new("pinned");
    let pinned = wf
        .add_task(etl("pinned").with_agent_id(worker("ghost")).with_max_retries(3))
        .unwrap();

    let done = engine.run(wf).await.unwrap();

    assert!(dispatcher.dispatched().is_empty());
    assert_eq!(done.task(&pinned).unwrap().status, TaskStatus::Failed);
    assert_eq!(done.task(&pinned).unwrap().retries, 0);
    assert!(done
        .errors
        .iter()
        .any(|e| e.kind == relay::core::ErrorKind::Configuration));
}
