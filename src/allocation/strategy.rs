//! Allocation strategy contract and the types shared by every strategy.

use crate::allocation::metrics::{AgentPerformanceMetrics, PerformanceTracker};
use crate::core::{Task, TaskId, WorkerId, WorkerRegistry, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Limits and preferences applied while allocating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationConstraints {
    /// Upper bound on tasks held by one worker.
    #[serde(default)]
    pub max_tasks_per_agent: Option<usize>,
    /// Workers above this utilization are not eligible.
    #[serde(default)]
    pub max_utilization: Option<f64>,
    /// Workers below this success rate are not eligible.
    #[serde(default)]
    pub min_success_rate: Option<f64>,
    #[serde(default)]
    pub excluded_workers: HashSet<WorkerId>,
    #[serde(default)]
    pub preferred_workers: HashSet<WorkerId>,
    /// Weight of spare capacity in the score multiplier.
    #[serde(default)]
    pub load_balance_weight: f64,
    /// Weight of task priority above 5 in the score multiplier.
    #[serde(default)]
    pub priority_weight: f64,
    /// Score multiplier per task domain.
    #[serde(default)]
    pub domain_priorities: HashMap<String, f64>,
}

impl AllocationConstraints {
    /// True when nothing restricts or biases allocation.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether `worker` may receive another task.
    pub fn permits(&self, worker: &WorkerId, metrics: &AgentPerformanceMetrics) -> bool {
        if self.excluded_workers.contains(worker) {
            return false;
        }
        if let Some(max) = self.max_tasks_per_agent {
            if metrics.active_tasks >= max {
                return false;
            }
        }
        if let Some(max) = self.max_utilization {
            if metrics.utilization > max {
                return false;
            }
        }
        if let Some(min) = self.min_success_rate {
            if metrics.success_rate < min {
                return false;
            }
        }
        true
    }

    pub fn is_preferred(&self, worker: &WorkerId) -> bool {
        self.preferred_workers.contains(worker)
    }

    /// Multiplier for the task's domain, 1 when unset.
    pub fn domain_priority(&self, task: &Task) -> f64 {
        task.domain
            .as_deref()
            .and_then(|d| self.domain_priorities.get(d))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Named score components, a multiplier, and the clamped total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub components: BTreeMap<String, f64>,
    pub multiplier: f64,
    /// Always within `[0, 1]`.
    pub total: f64,
    /// Unclamped `sum * multiplier`. Workers are compared on this, so
    /// multipliers still separate candidates whose totals saturate.
    #[serde(default)]
    pub rank: f64,
}

impl Default for ScoreBreakdown {
    fn default() -> Self {
        Self {
            components: BTreeMap::new(),
            multiplier: 1.0,
            total: 0.0,
            rank: 0.0,
        }
    }
}

impl ScoreBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.components.insert(name.to_string(), value);
        self
    }

    /// Sum the components, apply `multiplier` and clamp into `[0, 1]`.
    pub fn finish(mut self, multiplier: f64) -> Self {
        let sum: f64 = self.components.values().sum();
        let product = sum * multiplier;
        self.multiplier = multiplier;
        self.total = clamp_score(product);
        self.rank = if product.is_nan() { 0.0 } else { product };
        self
    }

    /// Whether this score beats `other`. Ties keep `other`.
    pub fn outranks(&self, other: &ScoreBreakdown) -> bool {
        self.rank > other.rank
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A worker chosen for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    /// Name of the strategy that chose the worker.
    pub strategy: String,
}

/// Everything a strategy sees during one allocation call.
pub struct AllocationContext<'a> {
    pub workflow: &'a Workflow,
    /// Tasks to allocate, in the caller's order.
    pub tasks: Vec<&'a Task>,
    pub registry: &'a dyn WorkerRegistry,
    pub tracker: &'a PerformanceTracker,
    pub constraints: &'a AllocationConstraints,
}

impl AllocationContext<'_> {
    /// Workers of the task's agent type that the constraints allow.
    ///
    /// Registration order is kept. Tasks without an agent type have none.
    pub fn eligible_workers(&self, task: &Task) -> Vec<WorkerId> {
        let Some(agent_type) = task.agent_type.as_deref() else {
            return Vec::new();
        };
        self.registry
            .workers_by_type(agent_type)
            .into_iter()
            .filter(|w| self.constraints.permits(w, &self.tracker.metrics(w)))
            .collect()
    }

    pub fn average_priority(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.tasks.iter().map(|t| t.priority as f64).sum();
        sum / self.tasks.len() as f64
    }
}

/// A way of choosing workers for tasks.
pub trait AllocationStrategy: Send {
    /// Registry name, e.g. `"market"`.
    fn name(&self) -> &str;

    /// Score one worker for one task. The total is always in `[0, 1]`.
    fn score(
        &self,
        worker: &WorkerId,
        task: &Task,
        metrics: &AgentPerformanceMetrics,
        constraints: &AllocationConstraints,
    ) -> ScoreBreakdown;

    /// Choose workers for the context's tasks.
    ///
    /// The default picks the highest-scoring eligible worker for each task
    /// independently, earlier registration winning ties. Tasks with no
    /// eligible worker are omitted.
    fn allocate(&mut self, ctx: &AllocationContext<'_>) -> Vec<Allocation> {
        let mut allocations = Vec::new();
        for task in &ctx.tasks {
            let mut best: Option<(WorkerId, ScoreBreakdown)> = None;
            for worker in ctx.eligible_workers(task) {
                let breakdown =
                    self.score(&worker, task, &ctx.tracker.metrics(&worker), ctx.constraints);
                if best
                    .as_ref()
                    .map_or(true, |(_, current)| breakdown.outranks(current))
                {
                    best = Some((worker, breakdown));
                }
            }
            if let Some((worker_id, breakdown)) = best {
                allocations.push(Allocation {
                    task_id: task.id,
                    worker_id,
                    score: breakdown.total,
                    breakdown,
                    strategy: self.name().to_string(),
                });
            }
        }
        allocations
    }
}
