//! Market-based allocation: workers bid for tasks.

use crate::allocation::metrics::AgentPerformanceMetrics;
use crate::allocation::strategy::{
    Allocation, AllocationConstraints, AllocationContext, AllocationStrategy, ScoreBreakdown,
};
use crate::core::{Task, WorkerId};
use std::collections::HashMap;

const PREFERRED_BONUS: f64 = 1.2;

/// Every eligible worker bids on each task; the highest bid wins.
///
/// Tasks are auctioned highest priority first. Grants made earlier in the
/// batch count against `max_tasks_per_agent`, so with a limit of one a
/// worker wins at most one task per call.
#[derive(Debug, Default)]
pub struct MarketStrategy;

impl MarketStrategy {
    pub const NAME: &'static str = "market";

    pub fn new() -> Self {
        Self
    }
}

impl AllocationStrategy for MarketStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn score(
        &self,
        worker: &WorkerId,
        task: &Task,
        metrics: &AgentPerformanceMetrics,
        constraints: &AllocationConstraints,
    ) -> ScoreBreakdown {
        let avg_secs = metrics.average_duration.as_secs_f64();
        let speed = 1.0 / (1.0 + avg_secs / 60.0);
        let availability = 1.0 - metrics.utilization;
        let experience = (metrics.task_count as f64 / 50.0).min(1.0);

        let priority_factor = 0.5 + task.priority as f64 / 10.0;
        let duration_factor = task
            .estimated_duration
            .map(|d| 1.0 / (1.0 + d.as_secs_f64() / 3600.0))
            .unwrap_or(1.0);
        let domain_fit = task
            .domain
            .as_deref()
            .map(|d| 1.0 + 0.5 * metrics.domain_score(d))
            .unwrap_or(1.0);
        let preferred = if constraints.is_preferred(worker) {
            PREFERRED_BONUS
        } else {
            1.0
        };

        ScoreBreakdown::new()
            .with("success_rate", 0.35 * metrics.success_rate)
            .with("speed", 0.25 * speed)
            .with("availability", 0.2 * availability)
            .with("experience", 0.2 * experience)
            .finish(
                priority_factor
                    * duration_factor
                    * domain_fit
                    * preferred
                    * constraints.domain_priority(task),
            )
    }

    fn allocate(&mut self, ctx: &AllocationContext<'_>) -> Vec<Allocation> {
        let mut order: Vec<&Task> = ctx.tasks.clone();
        order.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut granted: HashMap<WorkerId, usize> = HashMap::new();
        let mut allocations = Vec::new();

        for task in order {
            let mut best: Option<(WorkerId, ScoreBreakdown)> = None;
            for worker in ctx.eligible_workers(task) {
                let metrics = ctx.tracker.metrics(&worker);
                if let Some(max) = ctx.constraints.max_tasks_per_agent {
                    let held = metrics.active_tasks + granted.get(&worker).copied().unwrap_or(0);
                    if held >= max {
                        continue;
                    }
                }
                let bid = self.score(&worker, task, &metrics, ctx.constraints);
                if best.as_ref().map_or(true, |(_, b)| bid.outranks(b)) {
                    best = Some((worker, bid));
                }
            }

            if let Some((worker_id, breakdown)) = best {
                *granted.entry(worker_id.clone()).or_insert(0) += 1;
                allocations.push(Allocation {
                    task_id: task.id,
                    worker_id,
                    score: breakdown.total,
                    breakdown,
                    strategy: Self::NAME.to_string(),
                });
            }
        }
        allocations
    }
}
