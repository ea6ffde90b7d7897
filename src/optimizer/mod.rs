//! Workflow optimization.
//!
//! The optimizer reads a workflow and its execution profile and returns an
//! improved copy. It never touches the workflow it is given: every change
//! is applied to a clone with fresh task ids, and `OptimizationResult::id_map`
//! relates the two.
//!
//! Improvements are heuristic estimates derived from task durations, not
//! measurements.

pub mod parallelize;
pub mod profile;
pub mod reallocate;

pub use parallelize::ParallelGroup;
pub use profile::{
    BottleneckKind, DependencyImpact, ExecutionMetrics, PerformanceBottleneck,
    ResourceUsageProfile, TaskExecutionProfile, WorkflowExecutionProfile,
};

use crate::core::{ExecutionMode, Task, TaskId, WorkerId, Workflow};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Duration assumed for a task with neither an actual nor an estimated one.
pub const DEFAULT_TASK_ESTIMATE: Duration = Duration::from_secs(1);

/// Efficiency gained per reallocated task, in percent.
const REALLOCATION_EFFICIENCY_PCT: f64 = 5.0;
const REALLOCATION_DURATION_PCT: f64 = 2.5;
const REALLOCATION_RELIABILITY_PCT: f64 = 1.5;

/// Run time the planners assume for `task`.
pub(crate) fn task_duration(task: &Task) -> Duration {
    task.effective_duration().unwrap_or(DEFAULT_TASK_ESTIMATE)
}

// ========== Options ==========

/// How far the optimizer may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// At most one parallel group.
    Light,
    /// Up to three parallel groups.
    #[default]
    Moderate,
    /// Every group, and a few dependency edges may be dropped.
    Aggressive,
}

impl OptimizationLevel {
    /// Maximum number of parallel groups applied, `None` for no limit.
    pub fn max_groups(&self) -> Option<usize> {
        match self {
            OptimizationLevel::Light => Some(1),
            OptimizationLevel::Moderate => Some(3),
            OptimizationLevel::Aggressive => None,
        }
    }

    pub fn allows_edge_removal(&self) -> bool {
        matches!(self, OptimizationLevel::Aggressive)
    }
}

impl std::fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationLevel::Light => write!(f, "light"),
            OptimizationLevel::Moderate => write!(f, "moderate"),
            OptimizationLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for OptimizationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(OptimizationLevel::Light),
            "moderate" => Ok(OptimizationLevel::Moderate),
            "aggressive" => Ok(OptimizationLevel::Aggressive),
            other => Err(Error::Validation(format!(
                "unknown optimization level '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOptions {
    pub level: OptimizationLevel,
    /// Cap on parallel-typed tasks in the optimized workflow.
    pub max_parallelism: Option<usize>,
    pub allow_reallocations: bool,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            level: OptimizationLevel::default(),
            max_parallelism: None,
            allow_reallocations: true,
        }
    }
}

// ========== Results ==========

/// One edit made to the optimized copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum OptimizationChange {
    Parallelized {
        tasks: Vec<TaskId>,
        estimated_speedup: f64,
    },
    DependencyRemoved {
        task: TaskId,
        dependency: TaskId,
    },
    ModePromoted {
        from: ExecutionMode,
        to: ExecutionMode,
    },
    Reallocated {
        task: TaskId,
        from: WorkerId,
        to: WorkerId,
    },
}

/// Estimated gains, in percent. Heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ImprovementEstimate {
    pub duration_pct: f64,
    pub resource_efficiency_pct: f64,
    pub reliability_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    /// The optimized copy.
    pub workflow: Workflow,
    /// Original task id -> task id in `workflow`.
    pub id_map: HashMap<TaskId, TaskId>,
    pub changes: Vec<OptimizationChange>,
    pub estimated_duration_before: Duration,
    pub estimated_duration_after: Duration,
    pub improvement: ImprovementEstimate,
    pub recommendations: Vec<String>,
    pub resolved_bottlenecks: Vec<PerformanceBottleneck>,
    pub remaining_bottlenecks: Vec<PerformanceBottleneck>,
}

impl OptimizationResult {
    pub fn is_unchanged(&self) -> bool {
        self.changes.is_empty()
    }
}

// ========== Optimizer ==========

#[derive(Debug, Clone, Default)]
pub struct WorkflowOptimizer {
    options: OptimizationOptions,
}

impl WorkflowOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: OptimizationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OptimizationOptions {
        &self.options
    }

    /// Profile a workflow in its current state.
    pub fn profile(
        &self,
        workflow: &Workflow,
        execution_id: Option<&str>,
    ) -> WorkflowExecutionProfile {
        profile::profile(workflow, execution_id)
    }

    /// Produce an optimized copy of `workflow`.
    ///
    /// `options` overrides the optimizer's own for this call. The copy keeps
    /// the task statuses of the original.
    pub fn optimize(
        &self,
        workflow: &Workflow,
        profile: &WorkflowExecutionProfile,
        options: Option<&OptimizationOptions>,
    ) -> OptimizationResult {
        let options = options.unwrap_or(&self.options);
        let (mut copy, id_map) = workflow.clone_with_new_ids();
        let before = estimate_duration(workflow);

        let parallel = parallelize::apply(&mut copy, options);
        let mut changes = parallel.changes;
        let mut recommendations = parallel.notes;

        let realloc = if options.allow_reallocations {
            reallocate::reallocate(&mut copy, profile, &id_map)
        } else {
            recommendations.push("Resource reallocation is disabled".to_string());
            reallocate::ReallocationOutcome::default()
        };
        changes.extend(realloc.changes);

        let moved = realloc.moved as f64;
        let after = before
            .saturating_sub(parallel.time_saved)
            .mul_f64((1.0 - moved * REALLOCATION_DURATION_PCT / 100.0).max(0.0));
        let duration_pct = if before.is_zero() {
            0.0
        } else {
            (before - after).as_secs_f64() / before.as_secs_f64() * 100.0
        };
        let improvement = ImprovementEstimate {
            duration_pct,
            resource_efficiency_pct: (moved * REALLOCATION_EFFICIENCY_PCT).min(100.0),
            reliability_pct: (moved * REALLOCATION_RELIABILITY_PCT).min(100.0),
        };

        let (resolved, remaining): (Vec<_>, Vec<_>) =
            profile.bottlenecks.iter().cloned().partition(|b| {
                is_resolved(b, &copy, &id_map, parallel.groups_applied, &realloc.relieved)
            });
        for bottleneck in &remaining {
            for recommendation in &bottleneck.recommendations {
                if !recommendations.contains(recommendation) {
                    recommendations.push(recommendation.clone());
                }
            }
        }

        info!(
            workflow = %workflow.name,
            changes = changes.len(),
            duration_pct = %format!("{duration_pct:.1}"),
            "workflow optimized"
        );
        OptimizationResult {
            workflow: copy,
            id_map,
            changes,
            estimated_duration_before: before,
            estimated_duration_after: after,
            improvement,
            recommendations,
            resolved_bottlenecks: resolved,
            remaining_bottlenecks: remaining,
        }
    }
}

/// Serial sum for sequential and hybrid workflows, duration-weighted
/// critical path otherwise.
pub fn estimate_duration(workflow: &Workflow) -> Duration {
    match workflow.execution_mode {
        ExecutionMode::Sequential | ExecutionMode::Hybrid => {
            workflow.tasks().iter().map(task_duration).sum()
        }
        ExecutionMode::Parallel | ExecutionMode::Adaptive => critical_path(workflow),
    }
}

fn critical_path(workflow: &Workflow) -> Duration {
    let Ok(order) = workflow.topological_order() else {
        return workflow.tasks().iter().map(task_duration).sum();
    };
    let mut finish: HashMap<TaskId, Duration> = HashMap::new();
    let mut longest = Duration::ZERO;
    for id in order {
        let Some(task) = workflow.task(&id) else {
            continue;
        };
        let start = task
            .dependencies
            .iter()
            .filter_map(|d| finish.get(d))
            .max()
            .copied()
            .unwrap_or_default();
        let end = start + task_duration(task);
        longest = longest.max(end);
        finish.insert(id, end);
    }
    longest
}

fn is_resolved(
    bottleneck: &PerformanceBottleneck,
    copy: &Workflow,
    id_map: &HashMap<TaskId, TaskId>,
    groups_applied: usize,
    relieved: &std::collections::HashSet<WorkerId>,
) -> bool {
    match bottleneck.kind {
        BottleneckKind::SequentialExecution => groups_applied > 0,
        BottleneckKind::ResourceOverload => bottleneck
            .affected
            .iter()
            .any(|w| relieved.contains(&WorkerId::new(w.as_str()))),
        BottleneckKind::ExcessCoupling => bottleneck.affected.iter().all(|id| {
            id.parse::<TaskId>()
                .ok()
                .and_then(|id| id_map.get(&id))
                .and_then(|id| copy.task(id))
                .map(|t| t.dependencies.len() <= profile::DEPENDENCY_LIMIT)
                .unwrap_or(false)
        }),
    }
}
