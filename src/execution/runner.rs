//! Workflow runner: the single owner of one workflow execution.
//!
//! Every outside input (worker outcomes, timer expiries, pause/resume,
//! cancel, raised events, snapshot requests) arrives as a [`RunnerMessage`]
//! on the runner's inbox and is handled one at a time, so the workflow is
//! only ever mutated from one place.

use crate::allocation::TaskAllocator;
use crate::core::{
    ConditionEnv, ErrorKind, FatalKind, PredicateRegistry, TaskId, TaskStatus, TaskType,
    WorkerId, Workflow, WorkflowId, WorkflowStatus,
};
use crate::error::{Error, Result};
use crate::execution::dispatch::{
    CompletionSender, DispatchRequest, Dispatcher, RunnerMessage, TaskOutcome,
};
use crate::execution::events::ExecutionEvent;
use crate::execution::strategy::{strategy_for, ExecutionStrategy, Step};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Allocator shared by every runner of an engine.
pub type SharedAllocator = Arc<Mutex<TaskAllocator>>;

/// Cloneable address of a running workflow.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    workflow_id: WorkflowId,
    tx: mpsc::UnboundedSender<RunnerMessage>,
}

impl RunnerHandle {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    fn send(&self, message: RunnerMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::RunnerClosed)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(RunnerMessage::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(RunnerMessage::Resume)
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(RunnerMessage::Cancel)
    }

    pub fn raise_event(&self, name: &str) -> Result<()> {
        self.send(RunnerMessage::RaiseEvent(name.to_string()))
    }

    /// Report the outcome of a dispatched attempt.
    pub fn report(&self, task_id: TaskId, attempt: u32, outcome: TaskOutcome) -> Result<()> {
        self.send(RunnerMessage::TaskFinished {
            task_id,
            attempt,
            outcome,
        })
    }

    /// Read-only copy of the workflow as the runner sees it now.
    pub async fn snapshot(&self) -> Result<Workflow> {
        let (reply, rx) = oneshot::channel();
        self.send(RunnerMessage::Snapshot(reply))?;
        rx.await.map_err(|_| Error::RunnerClosed)
    }
}

/// Drives one workflow from Pending to a terminal status.
///
/// The runner asks its [`ExecutionStrategy`] what to dispatch after every
/// change, gates conditional tasks, picks workers (explicit `agent_id` or
/// the shared allocator), hands work to the [`Dispatcher`] and applies the
/// failure policy: retry, then fallback, then fail the workflow for a
/// critical task, otherwise tolerate the failure.
pub struct WorkflowRunner {
    workflow: Workflow,
    strategy: Box<dyn ExecutionStrategy>,
    allocator: SharedAllocator,
    dispatcher: Arc<dyn Dispatcher>,
    predicates: Arc<PredicateRegistry>,
    events: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    allocation_strategy: Option<String>,
    inbox_tx: mpsc::UnboundedSender<RunnerMessage>,
    inbox_rx: mpsc::UnboundedReceiver<RunnerMessage>,
    /// Parent of every timer this runner arms.
    timers: CancellationToken,
    task_timers: HashMap<TaskId, CancellationToken>,
    /// Fallbacks activated by a failure, dispatched ahead of the plan.
    activated: VecDeque<TaskId>,
}

impl WorkflowRunner {
    pub fn new(
        workflow: Workflow,
        allocator: SharedAllocator,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            strategy: strategy_for(workflow.execution_mode),
            workflow,
            allocator,
            dispatcher,
            predicates: Arc::new(PredicateRegistry::new()),
            events: None,
            allocation_strategy: None,
            inbox_tx,
            inbox_rx,
            timers: CancellationToken::new(),
            task_timers: HashMap::new(),
            activated: VecDeque::new(),
        }
    }

    pub fn with_predicates(mut self, predicates: Arc<PredicateRegistry>) -> Self {
        self.predicates = predicates;
        self
    }

    /// Send lifecycle events to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Allocation strategy to use instead of the allocator's default.
    pub fn with_allocation_strategy(mut self, name: &str) -> Self {
        self.allocation_strategy = Some(name.to_string());
        self
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            workflow_id: self.workflow.id,
            tx: self.inbox_tx.clone(),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn snapshot(&self) -> Workflow {
        self.workflow.clone()
    }

    // ========== Lifecycle ==========

    /// Validate the workflow, mark it Running and dispatch the first tasks.
    ///
    /// # Errors
    /// Returns `Error::AlreadyStarted` unless the workflow is Pending, or the
    /// validation error of a malformed workflow.
    pub async fn start(&mut self) -> Result<()> {
        if self.workflow.status != WorkflowStatus::Pending {
            return Err(Error::AlreadyStarted {
                status: self.workflow.status.to_string(),
            });
        }
        self.workflow.validate()?;
        self.workflow.transition(WorkflowStatus::Running)?;
        info!(
            workflow = %self.workflow.name,
            id = %self.workflow.id.short(),
            mode = %self.workflow.execution_mode,
            tasks = self.workflow.task_count(),
            "workflow started"
        );
        self.emit(ExecutionEvent::WorkflowStarted {
            workflow_id: self.workflow.id,
        });

        if let Some(timeout) = self.workflow.timeout.filter(|t| !t.is_zero()) {
            self.spawn_timer(self.timers.child_token(), timeout, RunnerMessage::WorkflowTimedOut);
        }
        self.advance().await;
        Ok(())
    }

    /// Stop dispatching new tasks. In-flight work keeps running and its
    /// outcomes are still applied.
    pub fn pause(&mut self) -> Result<()> {
        self.workflow.transition(WorkflowStatus::Paused)?;
        info!(workflow = %self.workflow.name, "workflow paused");
        self.emit(ExecutionEvent::WorkflowPaused {
            workflow_id: self.workflow.id,
        });
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<()> {
        if self.workflow.status != WorkflowStatus::Paused {
            return Err(Error::InvalidTransition {
                from: self.workflow.status.to_string(),
                to: WorkflowStatus::Running.to_string(),
            });
        }
        self.workflow.transition(WorkflowStatus::Running)?;
        info!(workflow = %self.workflow.name, "workflow resumed");
        self.emit(ExecutionEvent::WorkflowResumed {
            workflow_id: self.workflow.id,
        });
        self.advance().await;
        Ok(())
    }

    /// Cancel the workflow and every unfinished task.
    ///
    /// Cancelling a finished workflow is a no-op.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.workflow.status.is_terminal() {
            return Ok(());
        }
        self.cancel_tasks().await;
        self.workflow.transition(WorkflowStatus::Cancelled)?;
        self.timers.cancel();
        info!(workflow = %self.workflow.name, "workflow cancelled");
        self.emit(ExecutionEvent::WorkflowCancelled {
            workflow_id: self.workflow.id,
        });
        Ok(())
    }

    /// Record an external event; event-gated tasks selected later see it.
    pub async fn raise_event(&mut self, name: &str) {
        debug!(workflow = %self.workflow.name, event = name, "event raised");
        self.workflow.events.insert(name.to_string());
        self.advance().await;
    }

    /// Run until the workflow reaches a terminal status.
    ///
    /// Starts the workflow first if it is still Pending. Returns the final
    /// workflow.
    pub async fn run(mut self) -> Result<Workflow> {
        if self.workflow.status == WorkflowStatus::Pending {
            self.start().await?;
        }
        while !self.workflow.status.is_terminal() {
            let Some(message) = self.inbox_rx.recv().await else {
                break;
            };
            if let Err(e) = self.handle_message(message).await {
                warn!(workflow = %self.workflow.name, error = %e, "runner message rejected");
            }
        }
        self.timers.cancel();
        Ok(self.workflow)
    }

    /// Apply one inbox message.
    pub async fn handle_message(&mut self, message: RunnerMessage) -> Result<()> {
        match message {
            RunnerMessage::TaskFinished {
                task_id,
                attempt,
                outcome,
            } => {
                if !self.is_current_attempt(&task_id, attempt) {
                    debug!(task = %task_id.short(), attempt, "ignoring stale task outcome");
                    return Ok(());
                }
                match outcome {
                    TaskOutcome::Completed(result) => self.on_task_completed(task_id, result).await,
                    TaskOutcome::Failed(error) => self.on_task_failed(task_id, &error).await,
                    TaskOutcome::TimedOut => {
                        self.on_task_timeout(task_id).await;
                        Ok(())
                    }
                }
            }
            RunnerMessage::WorkflowTimedOut => {
                let limit = self.workflow.timeout.unwrap_or_default();
                self.fail_workflow(
                    FatalKind::WorkflowTimeout,
                    format!("workflow exceeded its timeout of {:?}", limit),
                )
                .await;
                Ok(())
            }
            RunnerMessage::Pause => self.pause(),
            RunnerMessage::Resume => self.resume().await,
            RunnerMessage::Cancel => self.cancel().await,
            RunnerMessage::RaiseEvent(name) => {
                self.raise_event(&name).await;
                Ok(())
            }
            RunnerMessage::Snapshot(reply) => {
                let _ = reply.send(self.workflow.clone());
                Ok(())
            }
        }
    }

    // ========== Task outcomes ==========

    /// A worker finished a task.
    ///
    /// Mapped result fields are copied into the context, the allocator
    /// learns the outcome and dispatch advances. Outcomes for tasks that are
    /// no longer running are ignored.
    pub async fn on_task_completed(&mut self, task_id: TaskId, result: Value) -> Result<()> {
        if !self.is_running_task(&task_id) {
            debug!(task = %task_id.short(), "ignoring completion of task that is not running");
            return Ok(());
        }
        self.disarm(&task_id);
        let written = self.workflow.complete_task(&task_id, result)?;
        if let Some(task) = self.workflow.task(&task_id) {
            self.allocator
                .lock()
                .await
                .record_outcome(task, TaskStatus::Completed, None);
            debug!(task = %task.name, context_writes = written, "task completed");
        }
        self.emit(ExecutionEvent::TaskCompleted {
            workflow_id: self.workflow.id,
            task_id,
        });
        self.maybe_iterate(&task_id);
        self.advance().await;
        Ok(())
    }

    /// A worker reported an error for a task.
    pub async fn on_task_failed(&mut self, task_id: TaskId, error: &str) -> Result<()> {
        if !self.is_running_task(&task_id) {
            debug!(task = %task_id.short(), "ignoring failure of task that is not running");
            return Ok(());
        }
        self.fail_task(task_id, ErrorKind::Task, error.to_string())
            .await;
        self.advance().await;
        Ok(())
    }

    async fn on_task_timeout(&mut self, task_id: TaskId) {
        let Some(task) = self.workflow.task(&task_id) else {
            return;
        };
        let message = format!(
            "task '{}' timed out after {:?}",
            task.name,
            task.timeout.unwrap_or_default()
        );
        if let Some(worker) = task.assigned_worker.as_ref() {
            self.dispatcher.cancel(worker, &task_id);
        }
        self.fail_task(task_id, ErrorKind::Timeout, message).await;
        self.advance().await;
    }

    /// Mark a task failed and apply the failure policy.
    async fn fail_task(&mut self, task_id: TaskId, kind: ErrorKind, message: String) {
        self.disarm(&task_id);
        let Some(task) = self.workflow.task_mut(&task_id) else {
            return;
        };
        if let Err(e) = task.fail(&message) {
            warn!(task = %task.name, error = %e, "cannot mark task failed");
            return;
        }
        self.workflow.record_error(kind, Some(task_id), &message);
        if let Some(task) = self.workflow.task(&task_id) {
            self.allocator
                .lock()
                .await
                .record_outcome(task, TaskStatus::Failed, Some(&message));
        }
        self.emit(ExecutionEvent::TaskFailed {
            workflow_id: self.workflow.id,
            task_id,
            error: message,
        });

        let Some(task) = self.workflow.task(&task_id) else {
            return;
        };
        let name = task.name.clone();
        let critical = task.critical;
        let fallback = task.fallback;

        // Configuration problems do not go away on retry.
        if task.can_retry() && kind != ErrorKind::Configuration {
            if let Some(task) = self.workflow.task_mut(&task_id) {
                if task.reset_for_retry().is_ok() {
                    info!(task = %name, retry = task.retries, limit = task.retry_limit(), "retrying task");
                    let retry = task.retries;
                    self.emit(ExecutionEvent::TaskRetrying {
                        workflow_id: self.workflow.id,
                        task_id,
                        retry,
                    });
                    return;
                }
            }
        }

        if let Some(fallback) = fallback {
            let pending = self
                .workflow
                .task(&fallback)
                .map(|t| t.status == TaskStatus::Pending)
                .unwrap_or(false);
            if pending {
                info!(task = %name, fallback = %fallback.short(), "activating fallback");
                self.workflow.release_fallback(&fallback);
                self.activated.push_back(fallback);
                self.emit(ExecutionEvent::FallbackActivated {
                    workflow_id: self.workflow.id,
                    task_id,
                    fallback,
                });
                return;
            }
        }

        if critical {
            self.fail_workflow(
                FatalKind::CriticalTaskFailed,
                format!("critical task '{}' failed", name),
            )
            .await;
            return;
        }

        warn!(task = %name, "task failed, continuing without it");
    }

    /// Re-queue a completed iterative task while its condition holds.
    fn maybe_iterate(&mut self, task_id: &TaskId) {
        let Some(task) = self.workflow.task(task_id) else {
            return;
        };
        if task.task_type != TaskType::Iterative || task.iterations + 1 >= task.max_iterations {
            return;
        }
        let Some(condition) = task.condition.as_ref() else {
            return;
        };
        let env = ConditionEnv {
            context: &self.workflow.context,
            events: &self.workflow.events,
            predicates: self.predicates.as_ref(),
        };
        if !condition.evaluate(&env).unwrap_or(false) {
            return;
        }

        let workflow_id = self.workflow.id;
        if let Some(task) = self.workflow.task_mut(task_id) {
            match task.reset_for_iteration() {
                Ok(()) => {
                    debug!(task = %task.name, iteration = task.iterations, "iterating task");
                    let iteration = task.iterations;
                    self.emit(ExecutionEvent::TaskIterating {
                        workflow_id,
                        task_id: *task_id,
                        iteration,
                    });
                }
                Err(e) => warn!(task = %task.name, error = %e, "cannot iterate task"),
            }
        }
    }

    // ========== Dispatch ==========

    /// Dispatch whatever can run until the plan is exhausted.
    async fn advance(&mut self) {
        loop {
            if self.workflow.status != WorkflowStatus::Running {
                return;
            }
            self.settle_fallbacks();

            if let Some(fallback) = self.activated.pop_front() {
                if self.workflow.is_ready(&fallback) {
                    self.select(fallback).await;
                }
                continue;
            }

            if self.workflow.is_complete() {
                self.complete_workflow();
                return;
            }

            let before = self.strategy.active_mode();
            let steps = self.strategy.plan(&self.workflow);
            let after = self.strategy.active_mode();
            if before != after {
                info!(workflow = %self.workflow.name, from = %before, to = %after, "execution strategy switched");
                self.emit(ExecutionEvent::StrategySwitched {
                    workflow_id: self.workflow.id,
                    from: before,
                    to: after,
                });
            }

            if steps.is_empty() {
                if self.workflow.active_count() == 0 {
                    let pending = self.workflow.count_with_status(TaskStatus::Pending);
                    self.fail_workflow(
                        FatalKind::Stall,
                        format!("workflow stalled with {} unreachable pending task(s)", pending),
                    )
                    .await;
                }
                return;
            }

            let mut progressed = false;
            for step in steps {
                if self.workflow.status != WorkflowStatus::Running {
                    return;
                }
                match step {
                    Step::Dispatch(task_id) => progressed |= self.select(task_id).await,
                    Step::Fatal(kind, message) => {
                        self.fail_workflow(kind, message).await;
                        return;
                    }
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// Gate a selected task on its condition, then dispatch or skip it.
    ///
    /// Returns whether the task left Pending.
    async fn select(&mut self, task_id: TaskId) -> bool {
        let Some(task) = self.workflow.task(&task_id) else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }

        if let Some(condition) = task.condition.as_ref() {
            let env = ConditionEnv {
                context: &self.workflow.context,
                events: &self.workflow.events,
                predicates: self.predicates.as_ref(),
            };
            let holds = match condition.evaluate(&env) {
                Ok(holds) => holds,
                Err(e) => {
                    let message = format!("task '{}': {}", task.name, e);
                    self.workflow
                        .record_error(ErrorKind::Configuration, Some(task_id), &message);
                    false
                }
            };
            if !holds {
                self.skip(&task_id);
                return true;
            }
        }

        self.dispatch(task_id).await;
        true
    }

    /// Assign a worker and hand the task to the dispatcher.
    async fn dispatch(&mut self, task_id: TaskId) {
        let worker = match self.choose_worker(&task_id).await {
            Ok(worker) => worker,
            Err((kind, message)) => {
                self.fail_task(task_id, kind, message).await;
                return;
            }
        };

        let Some(task) = self.workflow.task_mut(&task_id) else {
            return;
        };
        if let Err(e) = task.assign(worker.clone()).and_then(|_| task.start()) {
            warn!(task = %task.name, error = %e, "cannot start task");
            return;
        }
        let attempt = task.attempts;
        let task_name = task.name.clone();
        let timeout = task.timeout.filter(|t| !t.is_zero());

        self.allocator
            .lock()
            .await
            .record_assignment(task_id, worker.clone());
        debug!(task = %task_name, worker = %worker, attempt, "dispatching task");
        self.emit(ExecutionEvent::TaskStarted {
            workflow_id: self.workflow.id,
            task_id,
            worker: worker.clone(),
            attempt,
        });

        let request = DispatchRequest {
            worker,
            workflow_id: self.workflow.id,
            task_id,
            task_name,
            attempt,
            input: self.workflow.input_for(&task_id).unwrap_or_default(),
            reply: CompletionSender::new(task_id, attempt, self.inbox_tx.clone()),
        };
        if let Err(e) = self.dispatcher.dispatch(request) {
            self.fail_task(task_id, ErrorKind::Task, e.to_string()).await;
            return;
        }

        if let Some(timeout) = timeout {
            let token = self.timers.child_token();
            self.spawn_timer(
                token.clone(),
                timeout,
                RunnerMessage::TaskFinished {
                    task_id,
                    attempt,
                    outcome: TaskOutcome::TimedOut,
                },
            );
            if let Some(previous) = self.task_timers.insert(task_id, token) {
                previous.cancel();
            }
        }
    }

    /// Explicit `agent_id` if registered, otherwise the allocator's choice.
    async fn choose_worker(
        &self,
        task_id: &TaskId,
    ) -> std::result::Result<WorkerId, (ErrorKind, String)> {
        let Some(task) = self.workflow.task(task_id) else {
            return Err((ErrorKind::Configuration, format!("unknown task {}", task_id)));
        };
        let mut allocator = self.allocator.lock().await;

        if let Some(worker) = task.agent_id.as_ref() {
            if allocator.registry().contains(worker) {
                return Ok(worker.clone());
            }
            return Err((
                ErrorKind::Configuration,
                format!("task '{}': worker '{}' is not registered", task.name, worker),
            ));
        }

        let Some(agent_type) = task.agent_type.as_deref() else {
            return Err((
                ErrorKind::Configuration,
                format!("task '{}' names neither an agent type nor a worker", task.name),
            ));
        };
        if allocator.registry().workers_by_type(agent_type).is_empty() {
            return Err((
                ErrorKind::Configuration,
                format!("task '{}': no workers of type '{}'", task.name, agent_type),
            ));
        }

        let allocations = allocator
            .allocate(
                &self.workflow,
                std::slice::from_ref(task_id),
                self.allocation_strategy.as_deref(),
                None,
            )
            .map_err(|e| (ErrorKind::Configuration, e.to_string()))?;
        allocations
            .into_iter()
            .next()
            .map(|allocation| allocation.worker_id)
            .ok_or_else(|| {
                (
                    ErrorKind::AllocationMiss,
                    format!(
                        "task '{}': no eligible worker of type '{}'",
                        task.name, agent_type
                    ),
                )
            })
    }

    // ========== Helpers ==========

    fn skip(&mut self, task_id: &TaskId) {
        let Some(task) = self.workflow.task_mut(task_id) else {
            return;
        };
        if let Err(e) = task.skip() {
            warn!(task = %task.name, error = %e, "cannot skip task");
            return;
        }
        debug!(task = %task.name, "task skipped");
        self.emit(ExecutionEvent::TaskSkipped {
            workflow_id: self.workflow.id,
            task_id: *task_id,
        });
    }

    /// Skip reserved fallbacks whose primaries all finished without them.
    fn settle_fallbacks(&mut self) {
        let tasks = self.workflow.tasks();
        let unused: Vec<TaskId> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.workflow.is_reserved_fallback(&t.id))
            .filter(|t| {
                tasks
                    .iter()
                    .filter(|primary| primary.fallback == Some(t.id))
                    .all(|primary| primary.status.is_terminal())
            })
            .map(|t| t.id)
            .collect();
        for task_id in unused {
            self.skip(&task_id);
        }
    }

    fn complete_workflow(&mut self) {
        if let Err(e) = self.workflow.transition(WorkflowStatus::Completed) {
            warn!(workflow = %self.workflow.name, error = %e, "cannot complete workflow");
            return;
        }
        self.timers.cancel();
        info!(
            workflow = %self.workflow.name,
            completed = self.workflow.count_with_status(TaskStatus::Completed),
            failed = self.workflow.count_with_status(TaskStatus::Failed),
            skipped = self.workflow.count_with_status(TaskStatus::Skipped),
            "workflow completed"
        );
        self.emit(ExecutionEvent::WorkflowCompleted {
            workflow_id: self.workflow.id,
        });
    }

    /// Record a fatal error, cancel what is left and mark the workflow Failed.
    async fn fail_workflow(&mut self, kind: FatalKind, message: String) {
        if self.workflow.status.is_terminal() {
            return;
        }
        error!(workflow = %self.workflow.name, ?kind, error = %message, "workflow failed");
        self.workflow
            .record_error(ErrorKind::Fatal(kind), None, &message);
        self.cancel_tasks().await;
        if let Err(e) = self.workflow.transition(WorkflowStatus::Failed) {
            warn!(workflow = %self.workflow.name, error = %e, "cannot fail workflow");
        }
        self.timers.cancel();
        self.emit(ExecutionEvent::WorkflowFailed {
            workflow_id: self.workflow.id,
            error: message,
        });
    }

    /// Cancel every unfinished task, asking the dispatcher to stop
    /// in-flight work.
    async fn cancel_tasks(&mut self) {
        let active: Vec<TaskId> = self
            .workflow
            .tasks()
            .iter()
            .filter(|t| t.status.is_active())
            .map(|t| t.id)
            .collect();
        for task in self.workflow.tasks().iter().filter(|t| t.status.is_active()) {
            if let Some(worker) = task.assigned_worker.as_ref() {
                self.dispatcher.cancel(worker, &task.id);
            }
        }

        let cancelled = self.workflow.cancel_unfinished();
        debug!(workflow = %self.workflow.name, count = cancelled.len(), "tasks cancelled");

        let mut allocator = self.allocator.lock().await;
        for task_id in &active {
            if let Some(task) = self.workflow.task(task_id) {
                allocator.record_outcome(task, TaskStatus::Cancelled, None);
            }
        }
        drop(allocator);
        for task_id in &cancelled {
            self.disarm(task_id);
        }
        self.activated.clear();
    }

    fn is_running_task(&self, task_id: &TaskId) -> bool {
        self.workflow
            .task(task_id)
            .map(|t| t.status == TaskStatus::Running)
            .unwrap_or(false)
    }

    fn is_current_attempt(&self, task_id: &TaskId, attempt: u32) -> bool {
        self.workflow
            .task(task_id)
            .map(|t| t.status == TaskStatus::Running && t.attempts == attempt)
            .unwrap_or(false)
    }

    fn disarm(&mut self, task_id: &TaskId) {
        if let Some(token) = self.task_timers.remove(task_id) {
            token.cancel();
        }
    }

    /// Post `message` to this runner after `after`, unless `token` is
    /// cancelled first.
    fn spawn_timer(&self, token: CancellationToken, after: Duration, message: RunnerMessage) {
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = tx.send(message);
                }
            }
        });
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.send(event);
        }
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("workflow", &self.workflow.name)
            .field("status", &self.workflow.status)
            .field("mode", &self.strategy.active_mode())
            .finish()
    }
}
