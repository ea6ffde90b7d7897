//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted and hand-driven dispatchers
//! - Worker pools and engines wired to them
//! - Predefined workflow shapes

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use relay::allocation::TaskAllocator;
use relay::core::{ExecutionMode, Task, TaskId, WorkerDirectory, WorkerId, Workflow};
use relay::execution::{DispatchRequest, Dispatcher, Engine, ExecutionEvent, TaskOutcome};
use relay::{Error, Result};

/// Replies to every dispatch immediately from a per-task-name script.
///
/// Unscripted attempts complete with `{}`. A `None` entry never replies.
#[derive(Default)]
pub struct MockDispatcher {
    script: Mutex<HashMap<String, VecDeque<Option<TaskOutcome>>>>,
    requests: Mutex<Vec<DispatchRequest>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, task: &str, outcomes: Vec<Option<TaskOutcome>>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(task.to_string(), outcomes.into());
        self
    }

    /// Fail the next `times` attempts of `task`.
    pub fn failing(self, task: &str, times: usize) -> Self {
        let outcomes = (0..times)
            .map(|i| Some(TaskOutcome::Failed(format!("{task} failed ({})", i + 1))))
            .collect();
        self.on(task, outcomes)
    }

    pub fn completing(self, task: &str, result: Value) -> Self {
        self.on(task, vec![Some(TaskOutcome::Completed(result))])
    }

    /// Names of dispatched tasks, in dispatch order.
    pub fn dispatched(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.task_name.clone())
            .collect()
    }

    pub fn requests_for(&self, task: &str) -> Vec<DispatchRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_name == task)
            .cloned()
            .collect()
    }
}

impl Dispatcher for MockDispatcher {
    fn dispatch(&self, request: DispatchRequest) -> Result<()> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .get_mut(&request.task_name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Some(TaskOutcome::Completed(json!({}))));
        if let Some(outcome) = outcome {
            request.reply.send(outcome)?;
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

/// Hands every request to the test, which replies when it chooses.
pub struct ManualDispatcher(mpsc::UnboundedSender<DispatchRequest>);

impl Dispatcher for ManualDispatcher {
    fn dispatch(&self, request: DispatchRequest) -> Result<()> {
        self.0
            .send(request)
            .map_err(|e| Error::Dispatch(e.to_string()))
    }
}

/// Two `etl` workers and one `report` worker.
pub fn worker_pool() -> WorkerDirectory {
    WorkerDirectory::new()
        .with_worker("etl-1", "etl")
        .with_worker("etl-2", "etl")
        .with_worker("report-1", "report")
}

pub fn engine_with(dispatcher: Arc<dyn Dispatcher>) -> Engine {
    Engine::new(TaskAllocator::new(Arc::new(worker_pool())), dispatcher)
}

/// An engine whose requests arrive on the returned channel.
pub fn manual_engine() -> (Engine, mpsc::UnboundedReceiver<DispatchRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (engine_with(Arc::new(ManualDispatcher(tx))), rx)
}

pub fn etl(name: &str) -> Task {
    Task::new(name, "").with_agent_type("etl")
}

/// extract -> transform -> load
pub fn chain(mode: ExecutionMode) -> (Workflow, TaskId, TaskId, TaskId) {
    let mut wf = Workflow::new("chain").with_mode(mode);
    let a = wf.add_task(etl("extract")).unwrap();
    let b = wf.add_task(etl("transform").depends_on(a)).unwrap();
    let c = wf.add_task(etl("load").depends_on(b)).unwrap();
    (wf, a, b, c)
}

/// `count` independent tasks run one at a time.
pub fn sequential_batch(count: usize) -> Workflow {
    let mut wf = Workflow::new("batch").with_mode(ExecutionMode::Sequential);
    for i in 0..count {
        wf.add_task(etl(&format!("step-{i}")).with_estimated_duration(std::time::Duration::from_secs(2)))
            .unwrap();
    }
    wf
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn worker(id: &str) -> WorkerId {
    WorkerId::from(id)
}
