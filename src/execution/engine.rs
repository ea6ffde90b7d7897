//! Multi-workflow engine.
//!
//! The engine owns what runners share (allocator, dispatcher, predicates,
//! event sink), spawns one [`WorkflowRunner`] per submitted workflow and
//! routes outside requests to the right runner by workflow id.

use crate::allocation::TaskAllocator;
use crate::core::{PredicateRegistry, TaskId, Workflow, WorkflowId, WorkflowStatus};
use crate::error::{Error, Result};
use crate::execution::dispatch::{Dispatcher, TaskOutcome};
use crate::execution::events::ExecutionEvent;
use crate::execution::runner::{RunnerHandle, SharedAllocator, WorkflowRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A submitted workflow: its runner address and the task driving it.
#[derive(Debug)]
pub struct ExecutionHandle {
    workflow_id: WorkflowId,
    runner: RunnerHandle,
    join: JoinHandle<Result<Workflow>>,
}

impl ExecutionHandle {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn runner(&self) -> &RunnerHandle {
        &self.runner
    }

    /// Wait for the workflow to finish and return its final state.
    pub async fn wait(self) -> Result<Workflow> {
        self.join
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?
    }
}

/// Runs many workflows concurrently against one pool of workers.
pub struct Engine {
    allocator: SharedAllocator,
    dispatcher: Arc<dyn Dispatcher>,
    predicates: Arc<PredicateRegistry>,
    events: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    allocation_strategy: Option<String>,
    runners: Arc<RwLock<HashMap<WorkflowId, RunnerHandle>>>,
}

impl Engine {
    pub fn new(allocator: TaskAllocator, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            allocator: Arc::new(Mutex::new(allocator)),
            dispatcher,
            predicates: Arc::new(PredicateRegistry::new()),
            events: None,
            allocation_strategy: None,
            runners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = Arc::new(predicates);
        self
    }

    /// Forward every runner's lifecycle events to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Allocation strategy for every workflow instead of the allocator's default.
    pub fn with_allocation_strategy(mut self, name: &str) -> Self {
        self.allocation_strategy = Some(name.to_string());
        self
    }

    pub fn allocator(&self) -> SharedAllocator {
        self.allocator.clone()
    }

    /// Start a workflow on its own runner task.
    ///
    /// # Errors
    /// Returns `Error::AlreadyStarted` for a workflow that is not Pending, or
    /// the validation error of a malformed workflow.
    pub async fn submit(&self, workflow: Workflow) -> Result<ExecutionHandle> {
        if workflow.status != WorkflowStatus::Pending {
            return Err(Error::AlreadyStarted {
                status: workflow.status.to_string(),
            });
        }
        workflow.validate()?;

        let workflow_id = workflow.id;
        let name = workflow.name.clone();
        let mut runner =
            WorkflowRunner::new(workflow, self.allocator.clone(), self.dispatcher.clone())
                .with_predicates(self.predicates.clone());
        if let Some(events) = self.events.as_ref() {
            runner = runner.with_events(events.clone());
        }
        if let Some(strategy) = self.allocation_strategy.as_deref() {
            runner = runner.with_allocation_strategy(strategy);
        }

        let handle = runner.handle();
        self.runners.write().await.insert(workflow_id, handle.clone());
        info!(workflow = %name, id = %workflow_id.short(), "workflow submitted");

        let runners = self.runners.clone();
        let join = tokio::spawn(async move {
            let result = runner.run().await;
            runners.write().await.remove(&workflow_id);
            debug!(id = %workflow_id.short(), "runner finished");
            result
        });

        Ok(ExecutionHandle {
            workflow_id,
            runner: handle,
            join,
        })
    }

    /// Submit a workflow and wait for it to finish.
    pub async fn run(&self, workflow: Workflow) -> Result<Workflow> {
        self.submit(workflow).await?.wait().await
    }

    /// Ids of workflows that are still running.
    pub async fn active_workflows(&self) -> Vec<WorkflowId> {
        self.runners.read().await.keys().copied().collect()
    }

    async fn runner(&self, workflow_id: &WorkflowId) -> Result<RunnerHandle> {
        self.runners
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Route a worker's outcome to the runner that owns the task.
    pub async fn report(
        &self,
        workflow_id: &WorkflowId,
        task_id: TaskId,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> Result<()> {
        self.runner(workflow_id)
            .await?
            .report(task_id, attempt, outcome)
    }

    pub async fn pause(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.runner(workflow_id).await?.pause()
    }

    pub async fn resume(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.runner(workflow_id).await?.resume()
    }

    pub async fn cancel(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.runner(workflow_id).await?.cancel()
    }

    pub async fn raise_event(&self, workflow_id: &WorkflowId, name: &str) -> Result<()> {
        self.runner(workflow_id).await?.raise_event(name)
    }

    pub async fn snapshot(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        self.runner(workflow_id).await?.snapshot().await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("predicates", &self.predicates)
            .field("allocation_strategy", &self.allocation_strategy)
            .finish()
    }
}
