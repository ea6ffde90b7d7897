//! Performance-based allocation.

use crate::allocation::metrics::AgentPerformanceMetrics;
use crate::allocation::strategy::{AllocationConstraints, AllocationStrategy, ScoreBreakdown};
use crate::core::{Task, WorkerId};

/// Tasks with a priority above this get the priority bonus.
const PRIORITY_BASELINE: f64 = 5.0;

/// Multiplier for a preferred worker.
const PREFERRED_BONUS: f64 = 1.5;

/// Picks the worker with the best track record for each task.
///
/// The base score weighs success rate, spare capacity and experience against
/// the error rate; a worker's success in the task's domain adds a boost. The
/// constraint multiplier then rewards spare capacity, high task priority and
/// preferred workers.
#[derive(Debug, Default)]
pub struct PerformanceStrategy;

impl PerformanceStrategy {
    pub const NAME: &'static str = "performance";

    pub fn new() -> Self {
        Self
    }
}

impl AllocationStrategy for PerformanceStrategy {
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
        let spare = 1.0 - metrics.utilization;
        let experience = (metrics.task_count as f64 / 100.0).min(1.0);
        let domain = task
            .domain
            .as_deref()
            .map(|d| metrics.domain_score(d))
            .unwrap_or(0.0);

        let mut multiplier = 1.0 + constraints.load_balance_weight * spare;
        let priority = task.priority as f64;
        if priority > PRIORITY_BASELINE {
            multiplier *=
                1.0 + constraints.priority_weight * (priority - PRIORITY_BASELINE) / PRIORITY_BASELINE;
        }
        if constraints.is_preferred(worker) {
            multiplier *= PREFERRED_BONUS;
        }

        ScoreBreakdown::new()
            .with("success_rate", 0.4 * metrics.success_rate)
            .with("availability", 0.3 * spare)
            .with("experience", 0.2 * experience)
            .with("error_rate", -0.1 * metrics.error_rate)
            .with("domain", 0.2 * domain)
            .finish(multiplier)
    }
}
