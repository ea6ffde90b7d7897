//! Per-worker performance metrics.
//!
//! The `PerformanceTracker` is fed by the allocator with every assignment and
//! every terminal outcome. Strategies read the resulting
//! `AgentPerformanceMetrics` when scoring workers.

use crate::core::{TaskId, TaskStatus, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default number of concurrent tasks a worker is assumed to handle.
pub const DEFAULT_WORKER_CAPACITY: usize = 4;

/// Accumulated performance of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformanceMetrics {
    pub worker_id: WorkerId,
    /// Fraction of finished tasks that completed.
    pub success_rate: f64,
    /// Fraction of finished tasks that failed.
    pub error_rate: f64,
    /// Running average of task run time.
    pub average_duration: Duration,
    /// Number of finished tasks (completed or failed).
    pub task_count: u64,
    pub successes: u64,
    pub failures: u64,
    /// Tasks currently assigned to the worker.
    pub active_tasks: usize,
    /// Active tasks over capacity, capped at 1.
    pub utilization: f64,
    /// Success rate per task domain.
    pub domain_scores: HashMap<String, f64>,
    #[serde(default)]
    domain_counts: HashMap<String, u64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AgentPerformanceMetrics {
    /// Metrics for a worker with no history: optimistic success, no load.
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            success_rate: 1.0,
            error_rate: 0.0,
            average_duration: Duration::ZERO,
            task_count: 0,
            successes: 0,
            failures: 0,
            active_tasks: 0,
            utilization: 0.0,
            domain_scores: HashMap::new(),
            domain_counts: HashMap::new(),
            last_updated: None,
        }
    }

    /// Success rate in `domain`, 0 when the worker never ran one.
    pub fn domain_score(&self, domain: &str) -> f64 {
        self.domain_scores.get(domain).copied().unwrap_or(0.0)
    }

    fn record_finished(&mut self, success: bool, duration: Option<Duration>, domain: Option<&str>) {
        self.task_count += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        let n = self.task_count as f64;
        self.success_rate = self.successes as f64 / n;
        self.error_rate = self.failures as f64 / n;

        if let Some(sample) = duration {
            let old = self.average_duration.as_secs_f64();
            let avg = (old * (n - 1.0) + sample.as_secs_f64()) / n;
            self.average_duration = Duration::from_secs_f64(avg.max(0.0));
        }

        if let Some(domain) = domain {
            let count = self.domain_counts.entry(domain.to_string()).or_insert(0);
            *count += 1;
            let c = *count as f64;
            let old = self.domain_scores.get(domain).copied().unwrap_or(0.0);
            let sample = if success { 1.0 } else { 0.0 };
            self.domain_scores
                .insert(domain.to_string(), (old * (c - 1.0) + sample) / c);
        }
        self.last_updated = Some(Utc::now());
    }
}

/// Tracks worker metrics and in-flight assignments.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    metrics: HashMap<WorkerId, AgentPerformanceMetrics>,
    assignments: HashMap<TaskId, WorkerId>,
    capacity: usize,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_CAPACITY)
    }
}

impl PerformanceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            metrics: HashMap::new(),
            assignments: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Metrics for a worker, defaults if it has never been seen.
    pub fn metrics(&self, worker: &WorkerId) -> AgentPerformanceMetrics {
        self.metrics
            .get(worker)
            .cloned()
            .unwrap_or_else(|| AgentPerformanceMetrics::new(worker.clone()))
    }

    /// Every worker with recorded metrics.
    pub fn all(&self) -> impl Iterator<Item = &AgentPerformanceMetrics> {
        self.metrics.values()
    }

    /// Whether any outcome has ever been recorded.
    pub fn has_history(&self) -> bool {
        self.metrics.values().any(|m| m.task_count > 0)
    }

    /// Worker currently holding the task.
    pub fn assignee(&self, task: &TaskId) -> Option<&WorkerId> {
        self.assignments.get(task)
    }

    /// Note that `worker` took `task`. Reassigning moves the load.
    pub fn record_assignment(&mut self, task: TaskId, worker: WorkerId) {
        if let Some(previous) = self.assignments.insert(task, worker.clone()) {
            self.adjust_active(&previous, -1);
        }
        self.adjust_active(&worker, 1);
    }

    /// Release the task's worker and, for completed or failed tasks, update
    /// its statistics.
    ///
    /// Returns the worker the task was assigned to, if any.
    pub fn record_outcome(
        &mut self,
        task: &TaskId,
        status: TaskStatus,
        duration: Option<Duration>,
        domain: Option<&str>,
    ) -> Option<WorkerId> {
        let worker = self.assignments.remove(task)?;
        self.adjust_active(&worker, -1);

        let success = match status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => false,
            _ => return Some(worker),
        };
        self.entry(&worker).record_finished(success, duration, domain);
        Some(worker)
    }

    fn entry(&mut self, worker: &WorkerId) -> &mut AgentPerformanceMetrics {
        self.metrics
            .entry(worker.clone())
            .or_insert_with(|| AgentPerformanceMetrics::new(worker.clone()))
    }

    fn adjust_active(&mut self, worker: &WorkerId, delta: isize) {
        let capacity = self.capacity as f64;
        let metrics = self.entry(worker);
        metrics.active_tasks = metrics.active_tasks.saturating_add_signed(delta);
        metrics.utilization = (metrics.active_tasks as f64 / capacity).min(1.0);
    }
}
