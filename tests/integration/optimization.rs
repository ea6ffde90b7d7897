//! Optimizer integration tests.
//!
//! Profiles come from real runs through the engine; optimized copies are
//! run again to check they still execute.

use std::sync::Arc;

use relay::core::{ExecutionMode, TaskStatus, TaskType, Workflow, WorkflowStatus};
use relay::optimizer::{
    BottleneckKind, OptimizationChange, OptimizationLevel, OptimizationOptions, WorkflowOptimizer,
};

use serde_json::json;

use crate::fixtures::{engine_with, etl, sequential_batch, MockDispatcher};

/// Test: Optimizer non-mutation
/// Given a workflow that has run to completion
/// When it is profiled and optimized
/// Then the original is byte-for-byte unchanged and the copy has new ids
#[tokio::test]
async fn test_optimizing_a_finished_run_leaves_it_untouched() {
    let engine = engine_with(Arc::new(MockDispatcher::new()));
    let done = engine.run(sequential_batch(6)).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    let before = serde_json::to_value(&done).unwrap();

    let optimizer = WorkflowOptimizer::new();
    let profile = optimizer.profile(&done, Some("run-1"));
    let result = optimizer.optimize(&done, &profile, None);

    assert_eq!(serde_json::to_value(&done).unwrap(), before);
    assert_eq!(profile.metrics.completed, 6);
    assert!((profile.metrics.success_rate - 1.0).abs() < 1e-9);
    assert!(!profile.workers.is_empty());
    assert_eq!(result.id_map.len(), 6);
    assert!(result.id_map.iter().all(|(old, new)| old != new));
    // statuses carry over to the copy
    assert!(result
        .workflow
        .tasks()
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
}

/// Test: Optimized copy runs
/// Given a long sequential batch of independent tasks
/// When it is optimized and the copy is run
/// Then the copy runs in hybrid mode with parallel tasks and completes
#[tokio::test]
async fn test_optimized_copy_executes_in_hybrid_mode() {
    let original = sequential_batch(6);
    let optimizer = WorkflowOptimizer::new();
    let profile = optimizer.profile(&original, None);
    assert!(profile
        .bottlenecks
        .iter()
        .any(|b| b.kind == BottleneckKind::SequentialExecution));

    let result = optimizer.optimize(&original, &profile, None);

    assert_eq!(result.workflow.execution_mode, ExecutionMode::Hybrid);
    assert!(result
        .changes
        .iter()
        .any(|c| matches!(c, OptimizationChange::ModePromoted { .. })));
    assert!(result
        .resolved_bottlenecks
        .iter()
        .any(|b| b.kind == BottleneckKind::SequentialExecution));
    assert!(result.estimated_duration_after < result.estimated_duration_before);
    assert_eq!(original.execution_mode, ExecutionMode::Sequential);

    let dispatcher = Arc::new(MockDispatcher::new());
    let engine = engine_with(dispatcher.clone());
    let done = engine.run(result.workflow).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(dispatcher.dispatched().len(), 6);
    assert!(done.tasks().iter().all(|t| t.task_type == TaskType::Parallel));
}

/// Test: Data order across parallel groups
/// Given a sequential run where a later task reads what an earlier one writes
/// When the optimizer splits them into separate parallel groups and the copy runs
/// Then the reader starts only after the writer and sees its value
#[tokio::test]
async fn test_optimized_groups_keep_writer_before_reader() {
    let mut original = Workflow::new("handoff").with_mode(ExecutionMode::Sequential);
    original.add_task(etl("writer").with_output("k", "k")).unwrap();
    original.add_task(etl("side-a")).unwrap();
    original.add_task(etl("reader").with_input("k", "k")).unwrap();
    original.add_task(etl("side-b")).unwrap();
    let optimizer = WorkflowOptimizer::new();
    let profile = optimizer.profile(&original, None);

    let result = optimizer.optimize(&original, &profile, None);
    assert_eq!(result.workflow.execution_mode, ExecutionMode::Hybrid);

    let dispatcher = Arc::new(MockDispatcher::new().completing("writer", json!({"k": 7})));
    let engine = engine_with(dispatcher.clone());
    let done = engine.run(result.workflow).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(dispatcher.requests_for("reader")[0].input.get("k"), Some(&json!(7)));
    let order = dispatcher.dispatched();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(position("writer") < position("reader"));
    assert!(position("side-a") < position("reader"));
}

/// Test: Parallelism cap
/// Given a cap lower than the only parallel group
/// When the workflow is optimized
/// Then nothing changes and the sequential bottleneck remains
#[test]
fn test_parallelism_cap_blocks_oversized_group() {
    let original = sequential_batch(6);
    let optimizer = WorkflowOptimizer::new();
    let profile = optimizer.profile(&original, None);
    let options = OptimizationOptions {
        level: OptimizationLevel::Aggressive,
        max_parallelism: Some(3),
        allow_reallocations: false,
    };

    let result = optimizer.optimize(&original, &profile, Some(&options));

    assert!(result.is_unchanged());
    assert_eq!(result.workflow.execution_mode, ExecutionMode::Sequential);
    assert_eq!(result.remaining_bottlenecks.len(), 1);
    assert_eq!(result.improvement.duration_pct, 0.0);
    assert!(!result.recommendations.is_empty());
}
