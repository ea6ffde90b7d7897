//! Execution events for observers.

use crate::core::{ExecutionMode, TaskId, WorkerId, WorkflowId};
use serde::Serialize;

/// Lifecycle notifications emitted while workflows run.
///
/// These events allow external components (a CLI, a dashboard, tests) to
/// follow execution without polling the runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
    },
    /// A task was sent to a worker.
    TaskStarted {
        workflow_id: WorkflowId,
        task_id: TaskId,
        worker: WorkerId,
        attempt: u32,
    },
    TaskCompleted {
        workflow_id: WorkflowId,
        task_id: TaskId,
    },
    TaskFailed {
        workflow_id: WorkflowId,
        task_id: TaskId,
        error: String,
    },
    /// A failed task went back to pending for another attempt.
    TaskRetrying {
        workflow_id: WorkflowId,
        task_id: TaskId,
        retry: u32,
    },
    TaskSkipped {
        workflow_id: WorkflowId,
        task_id: TaskId,
    },
    /// An iterative task is about to run again.
    TaskIterating {
        workflow_id: WorkflowId,
        task_id: TaskId,
        iteration: u32,
    },
    FallbackActivated {
        workflow_id: WorkflowId,
        task_id: TaskId,
        fallback: TaskId,
    },
    /// The adaptive strategy changed the mode driving dispatch.
    StrategySwitched {
        workflow_id: WorkflowId,
        from: ExecutionMode,
        to: ExecutionMode,
    },
    WorkflowPaused {
        workflow_id: WorkflowId,
    },
    WorkflowResumed {
        workflow_id: WorkflowId,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        error: String,
    },
    WorkflowCancelled {
        workflow_id: WorkflowId,
    },
}

impl ExecutionEvent {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            ExecutionEvent::WorkflowStarted { workflow_id }
            | ExecutionEvent::TaskStarted { workflow_id, .. }
            | ExecutionEvent::TaskCompleted { workflow_id, .. }
            | ExecutionEvent::TaskFailed { workflow_id, .. }
            | ExecutionEvent::TaskRetrying { workflow_id, .. }
            | ExecutionEvent::TaskSkipped { workflow_id, .. }
            | ExecutionEvent::TaskIterating { workflow_id, .. }
            | ExecutionEvent::FallbackActivated { workflow_id, .. }
            | ExecutionEvent::StrategySwitched { workflow_id, .. }
            | ExecutionEvent::WorkflowPaused { workflow_id }
            | ExecutionEvent::WorkflowResumed { workflow_id }
            | ExecutionEvent::WorkflowCompleted { workflow_id }
            | ExecutionEvent::WorkflowFailed { workflow_id, .. }
            | ExecutionEvent::WorkflowCancelled { workflow_id } => *workflow_id,
        }
    }

    /// Whether this event ends the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::WorkflowCompleted { .. }
                | ExecutionEvent::WorkflowFailed { .. }
                | ExecutionEvent::WorkflowCancelled { .. }
        )
    }
}
