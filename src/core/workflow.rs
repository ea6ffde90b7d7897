//! Workflow container: an owned task DAG plus shared context.

use crate::core::dag::TaskGraph;
use crate::core::task::{Context, Task, TaskId, TaskStatus, DEFAULT_PRIORITY};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a workflow instance.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status of a workflow in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Workflow created but not yet started
    #[default]
    Pending,
    /// Workflow is actively executing
    Running,
    /// New dispatch is suspended
    Paused,
    /// Every task reached a terminal status
    Completed,
    /// Workflow failed with a fatal error
    Failed,
    /// Workflow was cancelled
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Paused => write!(f, "paused"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How the engine orders dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time in dependency order.
    Sequential,
    /// Every ready task at once.
    #[default]
    Parallel,
    /// Parallel-typed tasks overlap, everything else runs alone.
    Hybrid,
    /// Switches between sequential and parallel from the graph shape.
    Adaptive,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Hybrid => write!(f, "hybrid"),
            ExecutionMode::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Coordination hint consumed by the adaptive allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    /// A single coordinator picks the best-performing worker.
    Centralized,
    /// Work is spread evenly.
    Decentralized,
    /// Layered delegation; favours proven workers.
    Hierarchical,
    /// Workers bid for tasks.
    MarketBased,
}

/// Fatal conditions that fail a whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    /// A task was selected while one of its dependencies was not completed.
    UnsatisfiedDependency,
    /// Nothing running, nothing ready, and the workflow is not complete.
    Stall,
    /// A critical task failed and could not be recovered.
    CriticalTaskFailed,
    /// The workflow-level timeout elapsed.
    WorkflowTimeout,
}

/// Classification of a recorded workflow error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A task's execution failed.
    Task,
    /// A task exceeded its timeout.
    Timeout,
    /// No eligible worker was found for a task.
    AllocationMiss,
    /// Unresolvable configuration (worker type, predicate, strategy).
    Configuration,
    /// Workflow-ending failure.
    Fatal(FatalKind),
}

impl ErrorKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Fatal(_))
    }
}

/// An error recorded against a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub task_id: Option<TaskId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A DAG of tasks plus shared context, with its own status lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub coordination: Option<CoordinationStrategy>,
    /// Limit on the whole run.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Retry limit given to tasks that do not set their own.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub required_agent_types: Vec<String>,
    /// Tasks in insertion order.
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub errors: Vec<WorkflowError>,
    /// External events raised while running.
    #[serde(default)]
    pub events: HashSet<String>,
    /// Fallback tasks released for normal scheduling.
    #[serde(default)]
    released_fallbacks: HashSet<TaskId>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Workflow {
    pub fn new(name: &str) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.to_string(),
            description: String::new(),
            status: WorkflowStatus::Pending,
            execution_mode: ExecutionMode::default(),
            coordination: None,
            timeout: None,
            max_retries: 0,
            priority: DEFAULT_PRIORITY,
            required_agent_types: Vec::new(),
            tasks: Vec::new(),
            context: Context::new(),
            errors: Vec::new(),
            events: HashSet::new(),
            released_fallbacks: HashSet::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_coordination(mut self, coordination: CoordinationStrategy) -> Self {
        self.coordination = Some(coordination);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    // ========== Task graph ==========

    /// Add a task to the workflow.
    ///
    /// Every referenced dependency, subtask and fallback must already be part
    /// of the workflow, so adding a task can never close a cycle. Tasks
    /// without their own retry limit inherit `max_retries`.
    ///
    /// # Errors
    /// Returns an error for a duplicate id or an unknown reference.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskId> {
        if self.contains_task(&task.id) {
            return Err(Error::Validation(format!(
                "Task {} already exists in workflow",
                task.id
            )));
        }
        for reference in task
            .dependencies
            .iter()
            .chain(task.subtasks.iter())
            .chain(task.fallback.iter())
        {
            if !self.contains_task(reference) {
                return Err(Error::TaskNotFound(reference.to_string()));
            }
        }
        if task.max_retries.is_none() {
            task.max_retries = Some(self.max_retries);
        }
        for agent_type in task.agent_type.iter() {
            if !self.required_agent_types.contains(agent_type) {
                self.required_agent_types.push(agent_type.clone());
            }
        }

        let id = task.id;
        self.tasks.push(task);
        Ok(id)
    }

    /// Make `task` depend on `depends_on`.
    ///
    /// # Errors
    /// Returns `Error::CycleDetected` if the edge would close a cycle.
    pub fn add_dependency(&mut self, task: &TaskId, depends_on: &TaskId) -> Result<()> {
        let mut graph = self.graph();
        graph.add_dependency(depends_on, task)?;
        let task = self
            .task_mut(task)
            .ok_or_else(|| Error::TaskNotFound(task.to_string()))?;
        if !task.dependencies.contains(depends_on) {
            task.dependencies.push(*depends_on);
        }
        Ok(())
    }

    /// Set the task run when `task` exhausts its retries.
    pub fn set_fallback(&mut self, task: &TaskId, fallback: &TaskId) -> Result<()> {
        if task == fallback {
            return Err(Error::Validation(format!(
                "Task {} cannot be its own fallback",
                task
            )));
        }
        if !self.contains_task(fallback) {
            return Err(Error::TaskNotFound(fallback.to_string()));
        }
        let task = self
            .task_mut(task)
            .ok_or_else(|| Error::TaskNotFound(task.to_string()))?;
        task.fallback = Some(*fallback);
        Ok(())
    }

    /// Remove a task and scrub every reference to it.
    pub fn remove_task(&mut self, id: &TaskId) -> Result<Task> {
        let position = self
            .tasks
            .iter()
            .position(|t| t.id == *id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        let removed = self.tasks.remove(position);

        for task in &mut self.tasks {
            task.dependencies.retain(|d| d != id);
            task.subtasks.retain(|s| s != id);
            if task.fallback == Some(*id) {
                task.fallback = None;
            }
        }
        self.released_fallbacks.remove(id);
        Ok(removed)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == *id)
    }

    pub fn task_by_name(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == *id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Build the dependency graph for analysis.
    pub fn graph(&self) -> TaskGraph {
        TaskGraph::from_tasks(&self.tasks)
    }

    /// Task ids in dependency order, insertion order breaking ties.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        self.graph().topological_order()
    }

    /// Check that ids are unique, references resolve and there is no cycle.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id) {
                return Err(Error::Validation(format!("Duplicate task id {}", task.id)));
            }
        }
        for task in &self.tasks {
            for reference in task
                .dependencies
                .iter()
                .chain(task.subtasks.iter())
                .chain(task.fallback.iter())
            {
                if !seen.contains(reference) {
                    return Err(Error::TaskNotFound(reference.to_string()));
                }
            }
        }
        if let Some(member) = self.graph().cycle_member() {
            let name = self
                .task(&member)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| member.to_string());
            return Err(Error::CycleDetected(name));
        }
        Ok(())
    }

    /// Task input resolved from the workflow context.
    pub fn input_for(&self, id: &TaskId) -> Option<serde_json::Map<String, Value>> {
        self.task(id).map(|t| t.resolve_input(&self.context))
    }

    /// Complete a running task and copy its mapped result fields into the
    /// context. Returns the number of context keys written.
    pub fn complete_task(&mut self, id: &TaskId, result: Value) -> Result<usize> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == *id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        task.complete(result)?;
        let written = match &task.result {
            Some(result) => task.apply_output(result, &mut self.context),
            None => 0,
        };
        Ok(written)
    }

    // ========== Scheduling queries ==========

    /// Whether every dependency of the task is completed.
    pub fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.task(dep)
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// Whether the task is Pending with every dependency completed.
    pub fn is_ready(&self, id: &TaskId) -> bool {
        self.task(id)
            .map(|t| t.status == TaskStatus::Pending && self.dependencies_satisfied(t))
            .unwrap_or(false)
    }

    /// Whether the task is some other task's fallback and has not been released.
    pub fn is_reserved_fallback(&self, id: &TaskId) -> bool {
        !self.released_fallbacks.contains(id)
            && self.tasks.iter().any(|t| t.fallback == Some(*id))
    }

    /// Let a fallback task be scheduled like any other task.
    pub fn release_fallback(&mut self, id: &TaskId) {
        self.released_fallbacks.insert(*id);
    }

    /// Ready tasks that strategies may select, in insertion order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && !self.is_reserved_fallback(&t.id)
                    && self.dependencies_satisfied(t)
            })
            .map(|t| t.id)
            .collect()
    }

    /// A workflow is complete iff every task is terminal.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Number of tasks holding a worker (assigned or running).
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.status.is_active()).count()
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in &self.tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    // ========== Lifecycle ==========

    pub fn can_transition(&self, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self.status, to),
            (Pending, Running | Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Failed | Cancelled)
        )
    }

    /// Move to a new status, stamping `started_at`/`completed_at` once.
    pub fn transition(&mut self, to: WorkflowStatus) -> Result<()> {
        if !self.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        if to == WorkflowStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = to;
        Ok(())
    }

    /// Append an error record.
    pub fn record_error(&mut self, kind: ErrorKind, task_id: Option<TaskId>, message: &str) {
        self.errors.push(WorkflowError {
            kind,
            task_id,
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    /// The first fatal error recorded, if any.
    pub fn fatal_error(&self) -> Option<&WorkflowError> {
        self.errors.iter().find(|e| e.kind.is_fatal())
    }

    /// Cancel every unfinished task. Returns the ids that changed.
    pub fn cancel_unfinished(&mut self) -> Vec<TaskId> {
        self.tasks
            .iter_mut()
            .filter_map(|t| t.cancel().then_some(t.id))
            .collect()
    }

    /// Wall time of the run so far.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }

    // ========== Copying ==========

    /// Deep copy with fresh workflow and task ids.
    ///
    /// Dependencies, subtasks and fallbacks are re-linked against the new
    /// ids. Returns the copy and the old -> new task id map.
    pub fn clone_with_new_ids(&self) -> (Workflow, HashMap<TaskId, TaskId>) {
        let id_map: HashMap<TaskId, TaskId> =
            self.tasks.iter().map(|t| (t.id, TaskId::new())).collect();
        let relink = |id: &TaskId| id_map.get(id).copied();

        let mut copy = self.clone();
        copy.id = WorkflowId::new();
        for task in &mut copy.tasks {
            task.id = id_map[&task.id];
            task.dependencies = task.dependencies.iter().filter_map(relink).collect();
            task.subtasks = task.subtasks.iter().filter_map(relink).collect();
            task.fallback = task.fallback.as_ref().and_then(relink);
        }
        copy.released_fallbacks = self.released_fallbacks.iter().filter_map(relink).collect();
        for error in &mut copy.errors {
            error.task_id = error.task_id.as_ref().and_then(relink);
        }
        (copy, id_map)
    }
}
