//! Task data model for the workflow DAG.
//!
//! Tasks are the atomic units of work dispatched to workers. Each task
//! tracks its status, assignment, context mappings, timing, and results.

use crate::core::condition::Condition;
use crate::core::worker::WorkerId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// Shared scratch state of a workflow.
pub type Context = HashMap<String, Value>;

/// Default number of times an iterative task may run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default task priority on the 1-10 scale.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Unique identifier for a task within a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Classification of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Runs on its own; never overlaps other work in hybrid mode.
    #[default]
    Sequential,
    /// May run alongside other parallel tasks.
    Parallel,
    /// Runs only when its condition holds, otherwise skipped.
    Conditional,
    /// Re-runs while its condition holds, up to `max_iterations`.
    Iterative,
    /// Groups subtasks; scheduled like a sequential task.
    Composite,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Sequential => write!(f, "sequential"),
            TaskType::Parallel => write!(f, "parallel"),
            TaskType::Conditional => write!(f, "conditional"),
            TaskType::Iterative => write!(f, "iterative"),
            TaskType::Composite => write!(f, "composite"),
        }
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> Assigned -> Running -> {Completed | Failed | Cancelled | Skipped}`.
/// Failed tasks may re-enter Pending for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, waiting for dependencies or selection.
    #[default]
    Pending,
    /// A worker has been chosen but the task has not been sent yet.
    Assigned,
    /// Task has been dispatched and is executing on a worker.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed.
    Failed,
    /// Task was cancelled before finishing.
    Cancelled,
    /// Task was not run because its condition did not hold.
    Skipped,
}

impl TaskStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Skipped
        )
    }

    /// Check if the task currently occupies a worker slot.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Resources a task expects from the worker running it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Memory in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Any other named resource.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, f64>,
}

/// A single task in the workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name, unique within a workflow definition.
    pub name: String,
    /// What the task should accomplish.
    #[serde(default)]
    pub description: String,
    /// Classification used by strategies.
    #[serde(default)]
    pub task_type: TaskType,
    /// Batch a parallel-typed task overlaps with under hybrid execution.
    /// Parallel tasks without one share a single batch.
    #[serde(default)]
    pub parallel_group: Option<u32>,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Tasks that must be completed before this one may run.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Informational containment; never gates scheduling.
    #[serde(default)]
    pub subtasks: Vec<TaskId>,
    /// Task to run if this one exhausts its retries.
    #[serde(default)]
    pub fallback: Option<TaskId>,
    /// Kind of worker able to run this task.
    #[serde(default)]
    pub agent_type: Option<String>,
    /// Explicit worker, bypassing the allocator.
    #[serde(default)]
    pub agent_id: Option<WorkerId>,
    /// Worker the task was last assigned to.
    #[serde(default)]
    pub assigned_worker: Option<WorkerId>,
    /// Task input field -> context key.
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    /// Result field -> context key.
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    /// Per-attempt execution limit.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Retries consumed so far.
    #[serde(default)]
    pub retries: u32,
    /// Retry limit; filled from the workflow default when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Priority on a 1-10 scale.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Expected run time, used by allocators and the optimizer.
    #[serde(default)]
    pub estimated_duration: Option<Duration>,
    /// Resources required from the worker.
    #[serde(default)]
    pub resource_requirements: ResourceRequirements,
    /// Gate for conditional and iterative tasks.
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Knowledge domain, matched against worker domain scores.
    #[serde(default)]
    pub domain: Option<String>,
    /// Whether an unrecovered failure fails the whole workflow.
    #[serde(default)]
    pub critical: bool,
    /// Upper bound on runs of an iterative task.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Completed iterations of an iterative task.
    #[serde(default)]
    pub iterations: u32,
    /// Number of times the task has been dispatched.
    #[serde(default)]
    pub attempts: u32,
    /// Result reported by the worker.
    #[serde(default)]
    pub result: Option<Value>,
    /// Last error reported for this task.
    #[serde(default)]
    pub error: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task first started running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest attempt started running.
    #[serde(default)]
    pub attempt_started_at: Option<DateTime<Utc>>,
    /// When the task reached its terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time between start and terminal status.
    #[serde(default)]
    pub actual_duration: Option<Duration>,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Task {
    /// Create a new task with the given name and description.
    ///
    /// The task is created with Pending status, a generated ID,
    /// and current timestamp.
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            task_type: TaskType::default(),
            parallel_group: None,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            fallback: None,
            agent_type: None,
            agent_id: None,
            assigned_worker: None,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            timeout: None,
            retries: 0,
            max_retries: None,
            priority: DEFAULT_PRIORITY,
            estimated_duration: None,
            resource_requirements: ResourceRequirements::default(),
            condition: None,
            domain: None,
            critical: false,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            iterations: 0,
            attempts: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            attempt_started_at: None,
            completed_at: None,
            actual_duration: None,
            metadata: HashMap::new(),
        }
    }

    // ========== Builders ==========

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Mark the task parallel within batch `group`.
    pub fn in_parallel_group(mut self, group: u32) -> Self {
        self.task_type = TaskType::Parallel;
        self.parallel_group = Some(group);
        self
    }

    pub fn with_agent_type(mut self, agent_type: &str) -> Self {
        self.agent_type = Some(agent_type.to_string());
        self
    }

    pub fn with_agent_id(mut self, worker: WorkerId) -> Self {
        self.agent_id = Some(worker);
        self
    }

    pub fn depends_on(mut self, id: TaskId) -> Self {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn with_subtask(mut self, id: TaskId) -> Self {
        if !self.subtasks.contains(&id) {
            self.subtasks.push(id);
        }
        self
    }

    pub fn with_fallback(mut self, id: TaskId) -> Self {
        self.fallback = Some(id);
        self
    }

    pub fn with_input(mut self, field: &str, context_key: &str) -> Self {
        self.input_mapping
            .insert(field.to_string(), context_key.to_string());
        self
    }

    pub fn with_output(mut self, field: &str, context_key: &str) -> Self {
        self.output_mapping
            .insert(field.to_string(), context_key.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the priority, clamped into 1-10.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Mark the task as critical: its unrecovered failure fails the workflow.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    // ========== Lifecycle ==========

    /// Check whether `from -> to` is a legal status change for this task.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self.status, to) {
            (Pending, Assigned | Running | Skipped | Cancelled | Failed) => true,
            (Assigned, Running | Pending | Failed | Cancelled) => true,
            (Running, Completed | Failed | Cancelled) => true,
            (Failed, Pending) => true,
            (Completed, Pending) => self.task_type == TaskType::Iterative,
            _ => false,
        }
    }

    /// Move the task to a new status, stamping timestamps.
    ///
    /// Entering Running stamps `started_at` the first time only and
    /// `attempt_started_at` every time. Entering a
    /// terminal status stamps `completed_at` and `actual_duration` unless
    /// they are already set.
    pub fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        match to {
            TaskStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                self.attempt_started_at = Some(now);
            }
            TaskStatus::Pending => {
                self.completed_at = None;
                self.actual_duration = None;
            }
            s if s.is_terminal() => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                    self.actual_duration = self
                        .started_at
                        .and_then(|start| (now - start).to_std().ok());
                }
            }
            _ => {}
        }
        self.status = to;
        Ok(())
    }

    /// Record the worker chosen for this task.
    pub fn assign(&mut self, worker: WorkerId) -> Result<()> {
        self.transition(TaskStatus::Assigned)?;
        self.assigned_worker = Some(worker);
        Ok(())
    }

    /// Start the task execution, counting a dispatch attempt.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.attempts += 1;
        Ok(())
    }

    /// Mark the task as successfully completed with a result.
    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    /// Mark the task as skipped.
    pub fn skip(&mut self) -> Result<()> {
        self.transition(TaskStatus::Skipped)
    }

    /// Cancel the task if it has not finished yet.
    ///
    /// Returns whether the status changed.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.transition(TaskStatus::Cancelled).is_ok()
    }

    /// Put a failed task back to Pending and count the retry.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        self.transition(TaskStatus::Pending)?;
        self.retries += 1;
        Ok(())
    }

    /// Put a completed iterative task back to Pending for its next run.
    pub fn reset_for_iteration(&mut self) -> Result<()> {
        self.transition(TaskStatus::Pending)?;
        self.iterations += 1;
        Ok(())
    }

    /// Effective retry limit.
    pub fn retry_limit(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retries < self.retry_limit()
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time of the latest attempt, once it has ended.
    pub fn attempt_duration(&self) -> Option<Duration> {
        let start = self.attempt_started_at?;
        let end = self.completed_at?;
        (end - start).to_std().ok()
    }

    /// Run time used by planners: actual if known, else estimated.
    pub fn effective_duration(&self) -> Option<Duration> {
        self.actual_duration.or(self.estimated_duration)
    }

    // ========== Context mapping ==========

    /// Build the task input from the workflow context via `input_mapping`.
    ///
    /// Missing context keys are left out of the input.
    pub fn resolve_input(&self, context: &Context) -> Map<String, Value> {
        let mut input = Map::new();
        for (field, key) in &self.input_mapping {
            if let Some(value) = context.get(key) {
                input.insert(field.clone(), value.clone());
            }
        }
        input
    }

    /// Copy mapped result fields into the workflow context.
    ///
    /// Returns the number of context keys written.
    pub fn apply_output(&self, result: &Value, context: &mut Context) -> usize {
        let mut written = 0;
        for (field, key) in &self.output_mapping {
            if let Some(value) = result.get(field) {
                context.insert(key.clone(), value.clone());
                written += 1;
            }
        }
        written
    }

    /// Context keys this task reads.
    pub fn reads(&self) -> impl Iterator<Item = &String> {
        self.input_mapping.values()
    }

    /// Context keys this task writes.
    pub fn writes(&self) -> impl Iterator<Item = &String> {
        self.output_mapping.values()
    }
}
