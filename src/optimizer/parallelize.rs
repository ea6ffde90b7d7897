//! Parallelization: find runs of independent tasks and let them overlap.
//!
//! Tasks are walked in dependency order and greedily packed into groups of
//! adjacent tasks that share no dependency path and touch no common context
//! key. Applying a group marks its members as parallel tasks of one batch,
//! which hybrid execution runs side by side.

use crate::core::{ExecutionMode, TaskGraph, TaskId, TaskType, Workflow};
use crate::optimizer::{task_duration, OptimizationChange, OptimizationOptions};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Dependency edges an aggressive run may drop in total.
pub const MAX_REMOVED_EDGES: usize = 2;

/// Share of the serial time assumed lost to coordinating a group.
const COORDINATION_OVERHEAD: f64 = 0.1;

/// Tasks that may run at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelGroup {
    pub tasks: Vec<TaskId>,
    /// `(task, dependency)` edges that must be dropped for the group to hold.
    pub removed_edges: Vec<(TaskId, TaskId)>,
    /// Sum of member durations.
    pub serial_time: Duration,
    /// Longest member duration.
    pub longest: Duration,
}

impl ParallelGroup {
    /// `serial / (longest + 0.1 * serial)`.
    pub fn estimated_speedup(&self) -> f64 {
        let serial = self.serial_time.as_secs_f64();
        let denominator = self.longest.as_secs_f64() + COORDINATION_OVERHEAD * serial;
        if denominator <= 0.0 {
            1.0
        } else {
            serial / denominator
        }
    }

    /// Time saved compared with running the members one by one.
    pub fn time_saved(&self) -> Duration {
        let speedup = self.estimated_speedup();
        if speedup <= 1.0 {
            return Duration::ZERO;
        }
        self.serial_time
            .saturating_sub(self.serial_time.div_f64(speedup))
    }
}

/// What applying parallelization did to a workflow.
#[derive(Debug, Default)]
pub struct ParallelizationOutcome {
    pub changes: Vec<OptimizationChange>,
    pub groups_applied: usize,
    pub time_saved: Duration,
    pub notes: Vec<String>,
}

/// Find candidate groups in dependency order.
///
/// Only plain sequential or parallel tasks take part; conditional,
/// iterative and composite tasks, and reserved fallbacks, end the current
/// group. With `allow_edge_removal`, a task joins a group it is directly
/// and solely dependent on, up to [`MAX_REMOVED_EDGES`] times.
pub fn find_groups(workflow: &Workflow, allow_edge_removal: bool) -> Vec<ParallelGroup> {
    let Ok(order) = workflow.topological_order() else {
        return Vec::new();
    };
    let graph = workflow.graph();
    let mut edge_budget = if allow_edge_removal {
        MAX_REMOVED_EDGES
    } else {
        0
    };

    let mut groups = Vec::new();
    let mut current: Vec<TaskId> = Vec::new();
    let mut removed: Vec<(TaskId, TaskId)> = Vec::new();

    for id in order {
        if !is_candidate(workflow, &id) {
            close(workflow, &mut groups, &mut current, &mut removed);
            continue;
        }
        if current.is_empty() || independent(workflow, &graph, &id, &current) {
            current.push(id);
            continue;
        }
        if edge_budget > 0 {
            if let Some(edge) = removable_edge(workflow, &graph, &id, &current) {
                edge_budget -= 1;
                removed.push(edge);
                current.push(id);
                continue;
            }
        }
        close(workflow, &mut groups, &mut current, &mut removed);
        current.push(id);
    }
    close(workflow, &mut groups, &mut current, &mut removed);
    groups
}

/// Apply the best groups the options allow to `workflow`.
///
/// Groups are taken by estimated speedup, bounded by the level's group
/// count and by `max_parallelism` parallel tasks in total. Each applied
/// group gets its own `parallel_group` id. A sequential workflow that gains
/// parallel tasks is promoted to hybrid execution.
pub fn apply(workflow: &mut Workflow, options: &OptimizationOptions) -> ParallelizationOutcome {
    let mut outcome = ParallelizationOutcome::default();
    if !matches!(
        workflow.execution_mode,
        ExecutionMode::Sequential | ExecutionMode::Hybrid
    ) {
        outcome.notes.push(format!(
            "{} execution already overlaps independent tasks",
            workflow.execution_mode
        ));
        return outcome;
    }

    let mut groups = find_groups(workflow, options.level.allows_edge_removal());
    if groups.is_empty() {
        outcome
            .notes
            .push("No independent tasks found to parallelize".to_string());
        return outcome;
    }
    groups.sort_by(|a, b| b.estimated_speedup().total_cmp(&a.estimated_speedup()));

    let already_parallel = workflow
        .tasks()
        .iter()
        .filter(|t| t.task_type == TaskType::Parallel)
        .count();
    let mut budget = options
        .max_parallelism
        .map(|max| max.saturating_sub(already_parallel));
    let group_limit = options.level.max_groups().unwrap_or(usize::MAX);
    let mut next_group = workflow
        .tasks()
        .iter()
        .filter_map(|t| t.parallel_group)
        .max()
        .map_or(0, |g| g + 1);
    let mut capped = 0;
    let mut over_limit = 0;

    for group in groups {
        if outcome.groups_applied >= group_limit {
            over_limit += 1;
            continue;
        }
        let new_members = group
            .tasks
            .iter()
            .filter(|id| {
                workflow
                    .task(id)
                    .map(|t| t.task_type != TaskType::Parallel)
                    .unwrap_or(false)
            })
            .count();
        if let Some(remaining) = budget {
            if new_members > remaining {
                debug!(size = group.tasks.len(), remaining, "group exceeds parallelism cap");
                capped += 1;
                continue;
            }
            budget = Some(remaining - new_members);
        }

        for (task, dependency) in &group.removed_edges {
            if let Some(t) = workflow.task_mut(task) {
                t.dependencies.retain(|d| d != dependency);
            }
            outcome.changes.push(OptimizationChange::DependencyRemoved {
                task: *task,
                dependency: *dependency,
            });
        }
        for id in &group.tasks {
            if let Some(t) = workflow.task_mut(id) {
                t.task_type = TaskType::Parallel;
                t.parallel_group = Some(next_group);
            }
        }
        next_group += 1;
        outcome.time_saved += group.time_saved();
        outcome.groups_applied += 1;
        outcome.changes.push(OptimizationChange::Parallelized {
            tasks: group.tasks.clone(),
            estimated_speedup: group.estimated_speedup(),
        });
    }

    if outcome.groups_applied > 0 && workflow.execution_mode == ExecutionMode::Sequential {
        workflow.execution_mode = ExecutionMode::Hybrid;
        outcome.changes.push(OptimizationChange::ModePromoted {
            from: ExecutionMode::Sequential,
            to: ExecutionMode::Hybrid,
        });
    }
    if capped > 0 {
        outcome.notes.push(format!(
            "{} parallel group(s) exceed the parallelism cap",
            capped
        ));
    }
    if over_limit > 0 {
        outcome.notes.push(format!(
            "{} more parallel group(s) available at a higher optimization level",
            over_limit
        ));
    }
    outcome
}

fn is_candidate(workflow: &Workflow, id: &TaskId) -> bool {
    workflow
        .task(id)
        .map(|t| matches!(t.task_type, TaskType::Sequential | TaskType::Parallel))
        .unwrap_or(false)
        && !workflow.is_reserved_fallback(id)
}

/// No dependency path and no shared context key with any member.
fn independent(workflow: &Workflow, graph: &TaskGraph, id: &TaskId, members: &[TaskId]) -> bool {
    members
        .iter()
        .all(|m| !graph.are_dependent(id, m) && !shares_data(workflow, id, m))
}

/// Whether two tasks touch a common context key with at least one writer.
fn shares_data(workflow: &Workflow, a: &TaskId, b: &TaskId) -> bool {
    let (Some(a), Some(b)) = (workflow.task(a), workflow.task(b)) else {
        return false;
    };
    let a_writes: HashSet<&String> = a.writes().collect();
    let b_writes: HashSet<&String> = b.writes().collect();
    a.reads().any(|k| b_writes.contains(k))
        || b.reads().any(|k| a_writes.contains(k))
        || a_writes.intersection(&b_writes).next().is_some()
}

/// The single direct edge tying `id` to the group, if dropping it would
/// make `id` independent of every member.
fn removable_edge(
    workflow: &Workflow,
    graph: &TaskGraph,
    id: &TaskId,
    members: &[TaskId],
) -> Option<(TaskId, TaskId)> {
    let task = workflow.task(id)?;
    let mut related = members.iter().filter(|m| graph.are_dependent(id, m));
    let dependency = *related.next()?;
    if related.next().is_some() || !task.dependencies.contains(&dependency) {
        return None;
    }
    if members.iter().any(|m| shares_data(workflow, id, m)) {
        return None;
    }
    // another route from the dependency would keep the tasks ordered
    let other_route = task
        .dependencies
        .iter()
        .filter(|d| **d != dependency)
        .any(|d| graph.has_path(&dependency, d));
    if other_route {
        return None;
    }
    Some((*id, dependency))
}

fn close(
    workflow: &Workflow,
    groups: &mut Vec<ParallelGroup>,
    current: &mut Vec<TaskId>,
    removed: &mut Vec<(TaskId, TaskId)>,
) {
    let tasks = std::mem::take(current);
    let removed_edges = std::mem::take(removed);
    if tasks.len() < 2 {
        return;
    }
    let all_parallel = tasks.iter().all(|id| {
        workflow
            .task(id)
            .map(|t| t.task_type == TaskType::Parallel)
            .unwrap_or(false)
    });
    if all_parallel {
        return;
    }

    let durations: Vec<Duration> = tasks
        .iter()
        .filter_map(|id| workflow.task(id))
        .map(task_duration)
        .collect();
    groups.push(ParallelGroup {
        serial_time: durations.iter().sum(),
        longest: durations.iter().copied().max().unwrap_or_default(),
        tasks,
        removed_edges,
    });
}
