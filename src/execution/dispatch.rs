//! Dispatch contract between the engine and external workers.
//!
//! The engine hands each task to a [`Dispatcher`] together with a
//! [`CompletionSender`]. The dispatcher delivers the work however it likes
//! and, when the worker finishes, reports the outcome through the sender.
//! Outcomes travel back to the owning runner as [`RunnerMessage`]s.

use crate::core::{TaskId, WorkerId, Workflow, WorkflowId};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

/// How a dispatched attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The worker finished and produced a result.
    Completed(Value),
    /// The worker reported an error.
    Failed(String),
    /// The attempt ran past its deadline.
    TimedOut,
}

/// Messages processed by a workflow runner, one at a time.
#[derive(Debug)]
pub enum RunnerMessage {
    /// A dispatched attempt ended.
    TaskFinished {
        task_id: TaskId,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// The workflow-level timeout elapsed.
    WorkflowTimedOut,
    Pause,
    Resume,
    Cancel,
    /// An external event the host raised on the workflow.
    RaiseEvent(String),
    /// Request a read-only copy of the workflow.
    Snapshot(oneshot::Sender<Workflow>),
}

/// Reply channel for one dispatched attempt.
///
/// Carries the attempt number so a late reply for an attempt the engine has
/// already given up on is ignored.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    task_id: TaskId,
    attempt: u32,
    tx: mpsc::UnboundedSender<RunnerMessage>,
}

impl CompletionSender {
    pub(crate) fn new(
        task_id: TaskId,
        attempt: u32,
        tx: mpsc::UnboundedSender<RunnerMessage>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            tx,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report the outcome of this attempt.
    ///
    /// # Errors
    /// Returns `Error::RunnerClosed` if the workflow runner has exited.
    pub fn send(&self, outcome: TaskOutcome) -> Result<()> {
        self.tx
            .send(RunnerMessage::TaskFinished {
                task_id: self.task_id,
                attempt: self.attempt,
                outcome,
            })
            .map_err(|_| Error::RunnerClosed)
    }

    pub fn complete(&self, result: Value) -> Result<()> {
        self.send(TaskOutcome::Completed(result))
    }

    pub fn fail(&self, error: impl Into<String>) -> Result<()> {
        self.send(TaskOutcome::Failed(error.into()))
    }

    pub fn time_out(&self) -> Result<()> {
        self.send(TaskOutcome::TimedOut)
    }
}

/// Everything a worker needs to run one attempt of a task.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub worker: WorkerId,
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub task_name: String,
    /// 1-based dispatch attempt.
    pub attempt: u32,
    /// Input resolved from the workflow context.
    pub input: Map<String, Value>,
    pub reply: CompletionSender,
}

/// Delivers work to external workers.
///
/// `dispatch` is fire-and-forget: it must not wait for the worker. An error
/// means the request could not be delivered and becomes a task failure.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request: DispatchRequest) -> Result<()>;

    /// Best-effort cancellation of in-flight work.
    fn cancel(&self, _worker: &WorkerId, _task: &TaskId) {}
}
