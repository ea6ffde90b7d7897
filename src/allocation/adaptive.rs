//! Adaptive allocation: picks one of the other strategies per call.

use crate::allocation::market::MarketStrategy;
use crate::allocation::metrics::AgentPerformanceMetrics;
use crate::allocation::performance::PerformanceStrategy;
use crate::allocation::round_robin::RoundRobinStrategy;
use crate::allocation::strategy::{
    Allocation, AllocationConstraints, AllocationContext, AllocationStrategy, ScoreBreakdown,
};
use crate::core::{CoordinationStrategy, Task, WorkerId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Which strategy the adaptive allocator chose, and whether it produced anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveDecision {
    pub strategy: String,
    pub task_count: usize,
    pub produced_allocations: bool,
    pub at: DateTime<Utc>,
}

/// Scores round robin, performance and market for each call and delegates
/// to the best.
///
/// Small, low-priority, unconstrained batches favour round robin. High
/// priorities, recorded history and a centralized coordination hint favour
/// performance. Large or constrained batches and a market-based hint favour
/// the market.
#[derive(Debug, Default)]
pub struct AdaptiveStrategy {
    round_robin: RoundRobinStrategy,
    performance: PerformanceStrategy,
    market: MarketStrategy,
    decisions: Vec<AdaptiveDecision>,
}

impl AdaptiveStrategy {
    pub const NAME: &'static str = "adaptive";

    pub fn new() -> Self {
        Self::default()
    }

    /// Past choices, oldest first.
    pub fn decisions(&self) -> &[AdaptiveDecision] {
        &self.decisions
    }

    /// Heuristic suitability of each delegate for this batch.
    pub fn rank(ctx: &AllocationContext<'_>) -> [(&'static str, f64); 3] {
        let tasks = ctx.tasks.len();
        let constrained = !ctx.constraints.is_empty();
        let avg_priority = ctx.average_priority();
        let hint = ctx.workflow.coordination;

        let mut round_robin = 0.5;
        if tasks <= 5 {
            round_robin += 0.3;
        }
        if constrained {
            round_robin -= 0.2;
        }
        if avg_priority <= 5.0 {
            round_robin += 0.1;
        }

        let mut performance = 0.6;
        if avg_priority > 5.0 {
            performance += 0.2;
        }
        if ctx.tracker.has_history() {
            performance += 0.1;
        }
        if hint == Some(CoordinationStrategy::Centralized) {
            performance += 0.3;
        }

        let mut market = 0.5;
        if tasks > 10 {
            market += 0.3;
        }
        if constrained {
            market += 0.2;
        }
        if hint == Some(CoordinationStrategy::MarketBased) {
            market += 0.4;
        }

        [
            (RoundRobinStrategy::NAME, round_robin),
            (PerformanceStrategy::NAME, performance),
            (MarketStrategy::NAME, market),
        ]
    }

    /// Name of the best-ranked delegate; earlier entries win ties.
    pub fn choose(ctx: &AllocationContext<'_>) -> &'static str {
        let ranked = Self::rank(ctx);
        let mut best = ranked[0];
        for candidate in &ranked[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        best.0
    }
}

impl AllocationStrategy for AdaptiveStrategy {
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
        self.performance.score(worker, task, metrics, constraints)
    }

    fn allocate(&mut self, ctx: &AllocationContext<'_>) -> Vec<Allocation> {
        let chosen = Self::choose(ctx);
        let allocations = match chosen {
            RoundRobinStrategy::NAME => self.round_robin.allocate(ctx),
            MarketStrategy::NAME => self.market.allocate(ctx),
            _ => self.performance.allocate(ctx),
        };
        debug!(
            strategy = chosen,
            tasks = ctx.tasks.len(),
            allocated = allocations.len(),
            "adaptive allocation"
        );
        self.decisions.push(AdaptiveDecision {
            strategy: chosen.to_string(),
            task_count: ctx.tasks.len(),
            produced_allocations: !allocations.is_empty(),
            at: Utc::now(),
        });
        allocations
    }
}
