//! Round-robin allocation.

use crate::allocation::metrics::AgentPerformanceMetrics;
use crate::allocation::strategy::{
    Allocation, AllocationConstraints, AllocationContext, AllocationStrategy, ScoreBreakdown,
};
use crate::core::{Task, WorkerId};
use std::collections::HashMap;

/// Rotates through the workers of each agent type in registration order.
///
/// The cursor is kept per agent type and survives across calls, so
/// consecutive allocations spread over the whole pool.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursors: HashMap<String, usize>,
}

impl RoundRobinStrategy {
    pub const NAME: &'static str = "round_robin";

    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Rotation ignores performance; every permitted worker is equally good.
    fn score(
        &self,
        _worker: &WorkerId,
        _task: &Task,
        _metrics: &AgentPerformanceMetrics,
        _constraints: &AllocationConstraints,
    ) -> ScoreBreakdown {
        ScoreBreakdown::new().with("rotation", 1.0).finish(1.0)
    }

    fn allocate(&mut self, ctx: &AllocationContext<'_>) -> Vec<Allocation> {
        let mut allocations = Vec::new();
        for task in &ctx.tasks {
            let Some(agent_type) = task.agent_type.as_deref() else {
                continue;
            };
            let workers = ctx.registry.workers_by_type(agent_type);
            if workers.is_empty() {
                continue;
            }

            let cursor = self.cursors.entry(agent_type.to_string()).or_insert(0);
            let len = workers.len();
            let chosen = (0..len).map(|offset| (*cursor + offset) % len).find(|&i| {
                let worker = &workers[i];
                ctx.constraints.permits(worker, &ctx.tracker.metrics(worker))
            });

            if let Some(index) = chosen {
                *cursor = (index + 1) % len;
                let worker_id = workers[index].clone();
                let breakdown = self.score(
                    &worker_id,
                    task,
                    &ctx.tracker.metrics(&worker_id),
                    ctx.constraints,
                );
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
