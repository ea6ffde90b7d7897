//! Reallocation: move work off overloaded workers.

use crate::core::{TaskId, WorkerId, Workflow};
use crate::optimizer::profile::WorkflowExecutionProfile;
use crate::optimizer::{task_duration, OptimizationChange};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Utilization above which a worker sheds tasks.
pub const OVERLOADED: f64 = 0.8;
/// Utilization below which a worker takes tasks.
pub const UNDERUTILIZED: f64 = 0.4;

#[derive(Debug, Default)]
pub struct ReallocationOutcome {
    pub changes: Vec<OptimizationChange>,
    /// Workers that gave up at least one task.
    pub relieved: HashSet<WorkerId>,
    pub moved: usize,
}

/// Pin tasks from overloaded workers to compatible underutilized ones.
///
/// `profile` describes the original workflow and `id_map` maps its task
/// ids to the ids in `workflow`. Utilization is re-simulated after every
/// move so a receiving worker stops taking tasks once it is no longer
/// underutilized. A task is compatible with a worker that has already run
/// a task of the same agent type.
pub fn reallocate(
    workflow: &mut Workflow,
    profile: &WorkflowExecutionProfile,
    id_map: &HashMap<TaskId, TaskId>,
) -> ReallocationOutcome {
    let mut outcome = ReallocationOutcome::default();
    let mut load: BTreeMap<WorkerId, f64> = profile
        .workers
        .iter()
        .map(|w| (w.worker_id.clone(), w.utilization))
        .collect();

    let mut overloaded: Vec<_> = profile
        .workers
        .iter()
        .filter(|w| w.utilization > OVERLOADED)
        .collect();
    overloaded.sort_by(|a, b| b.utilization.total_cmp(&a.utilization));

    for worker in overloaded {
        let window = (worker.busy_time + worker.idle_time).as_secs_f64();
        for original in &worker.tasks {
            if load.get(&worker.worker_id).copied().unwrap_or(0.0) <= OVERLOADED {
                break;
            }
            let Some(id) = id_map.get(original) else {
                continue;
            };
            let Some(task) = workflow.task(id) else {
                continue;
            };
            let Some(agent_type) = task.agent_type.clone() else {
                continue;
            };
            let share = if window > 0.0 {
                task_duration(task).as_secs_f64() / window
            } else {
                worker.utilization / worker.tasks.len().max(1) as f64
            };

            let target = profile
                .workers
                .iter()
                .filter(|w| w.worker_id != worker.worker_id)
                .filter(|w| w.agent_types.contains(&agent_type))
                .filter_map(|w| {
                    let current = load.get(&w.worker_id).copied().unwrap_or(0.0);
                    (current < UNDERUTILIZED).then_some((w.worker_id.clone(), current))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let Some((target, _)) = target else {
                continue;
            };

            if let Some(task) = workflow.task_mut(id) {
                task.agent_id = Some(target.clone());
            }
            *load.entry(worker.worker_id.clone()).or_default() -= share;
            *load.entry(target.clone()).or_default() += share;
            debug!(task = %id.short(), from = %worker.worker_id, to = %target, "task reallocated");

            outcome.relieved.insert(worker.worker_id.clone());
            outcome.moved += 1;
            outcome.changes.push(OptimizationChange::Reallocated {
                task: *id,
                from: worker.worker_id.clone(),
                to: target,
            });
        }
    }
    outcome
}
