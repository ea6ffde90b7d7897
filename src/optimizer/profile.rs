//! Execution profiles and bottleneck detection.

use crate::core::{ExecutionMode, TaskId, TaskStatus, TaskType, WorkerId, Workflow, WorkflowId};
use crate::optimizer::task_duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Sequential workflows with more tasks than this are flagged.
pub const SEQUENTIAL_TASK_LIMIT: usize = 5;
/// Workers holding more tasks at once than this are flagged.
pub const CONCURRENCY_LIMIT: usize = 3;
/// Tasks with more dependencies than this are flagged.
pub const DEPENDENCY_LIMIT: usize = 3;

/// Everything measured about one execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionProfile {
    pub execution_id: String,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration: Option<Duration>,
    pub metrics: ExecutionMetrics,
    pub tasks: Vec<TaskExecutionProfile>,
    pub workers: Vec<ResourceUsageProfile>,
    pub bottlenecks: Vec<PerformanceBottleneck>,
}

impl WorkflowExecutionProfile {
    pub fn task(&self, id: &TaskId) -> Option<&TaskExecutionProfile> {
        self.tasks.iter().find(|t| t.task_id == *id)
    }

    pub fn worker(&self, id: &WorkerId) -> Option<&ResourceUsageProfile> {
        self.workers.iter().find(|w| w.worker_id == *id)
    }
}

/// Aggregate task counts and rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub unfinished: usize,
    /// Completed share of finished-by-worker tasks (completed + failed).
    pub success_rate: f64,
    pub error_rate: f64,
    /// Terminal share of all tasks.
    pub completion_rate: f64,
}

/// A dependency of a task with its weight in the task's wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyImpact {
    pub task_id: TaskId,
    /// Share of the task's total dependency time, 0..=1.
    pub impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionProfile {
    pub task_id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub worker: Option<WorkerId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Actual run time, or the estimate if the task has not run.
    pub duration: Duration,
    pub attempts: u32,
    pub dependencies: Vec<DependencyImpact>,
}

/// How one worker was used during the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageProfile {
    pub worker_id: WorkerId,
    /// Agent types of the tasks the worker ran.
    pub agent_types: Vec<String>,
    pub tasks: Vec<TaskId>,
    pub busy_time: Duration,
    pub idle_time: Duration,
    /// Time spent running more than one task at once.
    pub overload_time: Duration,
    pub peak_concurrency: usize,
    /// Busy share of the execution window, 0..=1.
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    SequentialExecution,
    ResourceOverload,
    ExcessCoupling,
}

impl std::fmt::Display for BottleneckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BottleneckKind::SequentialExecution => write!(f, "sequential execution"),
            BottleneckKind::ResourceOverload => write!(f, "resource overload"),
            BottleneckKind::ExcessCoupling => write!(f, "excess coupling"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBottleneck {
    pub kind: BottleneckKind,
    /// 1 (minor) to 10 (severe).
    pub severity: u8,
    /// Ids of the tasks or workers involved.
    pub affected: Vec<String>,
    pub description: String,
    pub recommendations: Vec<String>,
}

/// Build the execution profile of a workflow in its current state.
pub fn profile(workflow: &Workflow, execution_id: Option<&str>) -> WorkflowExecutionProfile {
    let workers = worker_profiles(workflow);
    let bottlenecks = detect_bottlenecks(workflow, &workers);
    WorkflowExecutionProfile {
        execution_id: execution_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        workflow_id: workflow.id,
        workflow_name: workflow.name.clone(),
        started_at: workflow.started_at,
        completed_at: workflow.completed_at,
        total_duration: workflow.elapsed(),
        metrics: metrics(workflow),
        tasks: task_profiles(workflow),
        workers,
        bottlenecks,
    }
}

fn metrics(workflow: &Workflow) -> ExecutionMetrics {
    let count = |status| workflow.count_with_status(status);
    let completed = count(TaskStatus::Completed);
    let failed = count(TaskStatus::Failed);
    let skipped = count(TaskStatus::Skipped);
    let cancelled = count(TaskStatus::Cancelled);
    let total = workflow.task_count();
    let finished = completed + failed;
    let terminal = completed + failed + skipped + cancelled;
    let ratio = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 };

    ExecutionMetrics {
        total_tasks: total,
        completed,
        failed,
        skipped,
        cancelled,
        unfinished: total - terminal,
        success_rate: ratio(completed, finished),
        error_rate: ratio(failed, finished),
        completion_rate: ratio(terminal, total),
    }
}

fn task_profiles(workflow: &Workflow) -> Vec<TaskExecutionProfile> {
    workflow
        .tasks()
        .iter()
        .map(|task| {
            let weights: Vec<(TaskId, f64)> = task
                .dependencies
                .iter()
                .map(|dep| {
                    let secs = workflow
                        .task(dep)
                        .map(|d| task_duration(d).as_secs_f64())
                        .unwrap_or(0.0);
                    (*dep, secs)
                })
                .collect();
            let total: f64 = weights.iter().map(|(_, w)| w).sum();
            let dependencies = weights
                .iter()
                .map(|(id, w)| DependencyImpact {
                    task_id: *id,
                    impact: if total > 0.0 {
                        w / total
                    } else {
                        1.0 / weights.len() as f64
                    },
                })
                .collect();

            TaskExecutionProfile {
                task_id: task.id,
                name: task.name.clone(),
                status: task.status,
                worker: task.assigned_worker.clone(),
                started_at: task.started_at,
                completed_at: task.completed_at,
                duration: task_duration(task),
                attempts: task.attempts,
                dependencies,
            }
        })
        .collect()
}

/// Per-worker usage from the intervals of the tasks each worker ran.
fn worker_profiles(workflow: &Workflow) -> Vec<ResourceUsageProfile> {
    let now = Utc::now();
    let mut by_worker: BTreeMap<WorkerId, Vec<&crate::core::Task>> = BTreeMap::new();
    for task in workflow.tasks() {
        if let Some(worker) = task.assigned_worker.as_ref() {
            by_worker.entry(worker.clone()).or_default().push(task);
        }
    }

    let window_start = workflow
        .started_at
        .or_else(|| workflow.tasks().iter().filter_map(|t| t.started_at).min());
    let window_end = workflow.completed_at.unwrap_or(now);
    let window = window_start
        .and_then(|start| (window_end - start).to_std().ok())
        .unwrap_or_default();

    by_worker
        .into_iter()
        .map(|(worker_id, tasks)| {
            let mut edges: Vec<(DateTime<Utc>, i32)> = Vec::new();
            for task in &tasks {
                if let Some(start) = task.started_at {
                    edges.push((start, 1));
                    edges.push((task.completed_at.unwrap_or(window_end), -1));
                }
            }
            // ends sort before starts at the same instant
            edges.sort_by_key(|&(at, delta)| (at, delta));

            let mut busy = chrono::Duration::zero();
            let mut overload = chrono::Duration::zero();
            let mut running = 0i32;
            let mut peak = 0i32;
            let mut last: Option<DateTime<Utc>> = None;
            for (at, delta) in edges {
                if let Some(prev) = last {
                    let span = at - prev;
                    if running >= 1 {
                        busy += span;
                    }
                    if running > 1 {
                        overload += span;
                    }
                }
                running += delta;
                peak = peak.max(running);
                last = Some(at);
            }

            let busy_time = busy.to_std().unwrap_or_default();
            let utilization = if window.is_zero() {
                0.0
            } else {
                (busy_time.as_secs_f64() / window.as_secs_f64()).min(1.0)
            };
            let mut agent_types: Vec<String> =
                tasks.iter().filter_map(|t| t.agent_type.clone()).collect();
            agent_types.sort();
            agent_types.dedup();

            ResourceUsageProfile {
                worker_id,
                agent_types,
                tasks: tasks.iter().map(|t| t.id).collect(),
                busy_time,
                idle_time: window.saturating_sub(busy_time),
                overload_time: overload.to_std().unwrap_or_default(),
                peak_concurrency: peak.max(0) as usize,
                utilization,
            }
        })
        .collect()
}

/// Heuristic bottleneck scan.
pub fn detect_bottlenecks(
    workflow: &Workflow,
    workers: &[ResourceUsageProfile],
) -> Vec<PerformanceBottleneck> {
    let mut found = Vec::new();

    let serial: Vec<&crate::core::Task> = workflow
        .tasks()
        .iter()
        .filter(|t| t.task_type != TaskType::Parallel)
        .collect();
    if workflow.execution_mode == ExecutionMode::Sequential && serial.len() > SEQUENTIAL_TASK_LIMIT
    {
        found.push(PerformanceBottleneck {
            kind: BottleneckKind::SequentialExecution,
            severity: 7,
            affected: serial.iter().map(|t| t.id.to_string()).collect(),
            description: format!("{} tasks run strictly one after another", serial.len()),
            recommendations: vec![
                "Run independent tasks in parallel".to_string(),
                "Switch the workflow to hybrid or parallel execution".to_string(),
            ],
        });
    }

    for worker in workers
        .iter()
        .filter(|w| w.peak_concurrency > CONCURRENCY_LIMIT)
    {
        found.push(PerformanceBottleneck {
            kind: BottleneckKind::ResourceOverload,
            severity: 6,
            affected: vec![worker.worker_id.to_string()],
            description: format!(
                "worker {} held {} tasks at once",
                worker.worker_id, worker.peak_concurrency
            ),
            recommendations: vec![
                "Move tasks to underutilized workers".to_string(),
                "Lower max_tasks_per_agent for this worker".to_string(),
            ],
        });
    }

    for task in workflow
        .tasks()
        .iter()
        .filter(|t| t.dependencies.len() > DEPENDENCY_LIMIT)
    {
        found.push(PerformanceBottleneck {
            kind: BottleneckKind::ExcessCoupling,
            severity: 5,
            affected: vec![task.id.to_string()],
            description: format!(
                "task '{}' waits on {} dependencies",
                task.name,
                task.dependencies.len()
            ),
            recommendations: vec![format!(
                "Split '{}' or drop dependencies it does not read from",
                task.name
            )],
        });
    }

    found
}
