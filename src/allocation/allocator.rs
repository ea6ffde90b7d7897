//! Task allocator: strategy registry plus performance feedback.

use crate::allocation::adaptive::AdaptiveStrategy;
use crate::allocation::market::MarketStrategy;
use crate::allocation::metrics::{AgentPerformanceMetrics, PerformanceTracker};
use crate::allocation::performance::PerformanceStrategy;
use crate::allocation::round_robin::RoundRobinStrategy;
use crate::allocation::strategy::{
    Allocation, AllocationConstraints, AllocationContext, AllocationStrategy,
};
use crate::core::{Task, TaskId, TaskStatus, WorkerId, WorkerRegistry, Workflow};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default allocation strategy name.
pub const DEFAULT_STRATEGY: &str = PerformanceStrategy::NAME;

/// Chooses workers for tasks and learns from their outcomes.
///
/// Strategies are registered by name; the four built-ins (`round_robin`,
/// `performance`, `market`, `adaptive`) are always present. Every
/// assignment and terminal outcome the engine reports feeds the shared
/// [`PerformanceTracker`] that strategies score against.
pub struct TaskAllocator {
    registry: Arc<dyn WorkerRegistry>,
    strategies: HashMap<String, Box<dyn AllocationStrategy>>,
    default_strategy: String,
    constraints: AllocationConstraints,
    tracker: PerformanceTracker,
}

impl TaskAllocator {
    pub fn new(registry: Arc<dyn WorkerRegistry>) -> Self {
        let mut allocator = Self {
            registry,
            strategies: HashMap::new(),
            default_strategy: DEFAULT_STRATEGY.to_string(),
            constraints: AllocationConstraints::default(),
            tracker: PerformanceTracker::default(),
        };
        allocator.register_strategy(Box::new(RoundRobinStrategy::new()));
        allocator.register_strategy(Box::new(PerformanceStrategy::new()));
        allocator.register_strategy(Box::new(MarketStrategy::new()));
        allocator.register_strategy(Box::new(AdaptiveStrategy::new()));
        allocator
    }

    /// Use `capacity` concurrent tasks per worker for utilization.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.tracker = PerformanceTracker::new(capacity);
        self
    }

    /// Constraints applied when a call does not pass its own.
    pub fn with_constraints(mut self, constraints: AllocationConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Strategy used when a call does not name one.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for an unregistered name.
    pub fn with_default_strategy(mut self, name: &str) -> Result<Self> {
        self.set_default_strategy(name)?;
        Ok(self)
    }

    pub fn set_default_strategy(&mut self, name: &str) -> Result<()> {
        if !self.strategies.contains_key(name) {
            return Err(unknown_strategy(name));
        }
        self.default_strategy = name.to_string();
        Ok(())
    }

    pub fn default_strategy(&self) -> &str {
        &self.default_strategy
    }

    /// Register a strategy, replacing any existing one with the same name.
    pub fn register_strategy(&mut self, strategy: Box<dyn AllocationStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registry(&self) -> &Arc<dyn WorkerRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn metrics(&self, worker: &WorkerId) -> AgentPerformanceMetrics {
        self.tracker.metrics(worker)
    }

    /// Choose workers for `tasks` of `workflow`.
    ///
    /// Unknown task ids and tasks without eligible workers are omitted from
    /// the result.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if `strategy` names no registered
    /// strategy.
    pub fn allocate(
        &mut self,
        workflow: &Workflow,
        tasks: &[TaskId],
        strategy: Option<&str>,
        constraints: Option<&AllocationConstraints>,
    ) -> Result<Vec<Allocation>> {
        let name = strategy.unwrap_or(self.default_strategy.as_str()).to_string();
        let chosen = self
            .strategies
            .get_mut(&name)
            .ok_or_else(|| unknown_strategy(&name))?;

        let ctx = AllocationContext {
            workflow,
            tasks: tasks.iter().filter_map(|id| workflow.task(id)).collect(),
            registry: self.registry.as_ref(),
            tracker: &self.tracker,
            constraints: constraints.unwrap_or(&self.constraints),
        };
        let allocations = chosen.allocate(&ctx);

        if allocations.len() < ctx.tasks.len() {
            debug!(
                strategy = %name,
                requested = ctx.tasks.len(),
                allocated = allocations.len(),
                "some tasks have no eligible worker"
            );
        }
        Ok(allocations)
    }

    /// Choose a worker for a single task with the default strategy.
    pub fn allocate_task(
        &mut self,
        workflow: &Workflow,
        task: &TaskId,
    ) -> Result<Option<Allocation>> {
        Ok(self
            .allocate(workflow, std::slice::from_ref(task), None, None)?
            .into_iter()
            .next())
    }

    /// Note that `worker` now holds `task`.
    pub fn record_assignment(&mut self, task: TaskId, worker: WorkerId) {
        debug!(task = %task.short(), worker = %worker, "assignment recorded");
        self.tracker.record_assignment(task, worker);
    }

    /// Release the task's worker and learn from the outcome.
    ///
    /// The duration sample covers the latest attempt only.
    pub fn record_outcome(&mut self, task: &Task, status: TaskStatus, error: Option<&str>) {
        let worker = self.tracker.record_outcome(
            &task.id,
            status,
            task.attempt_duration(),
            task.domain.as_deref(),
        );
        match (worker, error) {
            (Some(worker), Some(error)) => {
                warn!(task = %task.name, worker = %worker, %status, error, "task outcome recorded");
            }
            (Some(worker), None) => {
                debug!(task = %task.name, worker = %worker, %status, "task outcome recorded");
            }
            (None, _) => {}
        }
    }
}

impl std::fmt::Debug for TaskAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskAllocator")
            .field("strategies", &self.strategy_names())
            .field("default_strategy", &self.default_strategy)
            .field("constraints", &self.constraints)
            .finish()
    }
}

fn unknown_strategy(name: &str) -> Error {
    Error::Configuration(format!("unknown allocation strategy '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::metrics::AgentPerformanceMetrics;
    use crate::allocation::strategy::ScoreBreakdown;
    use crate::core::WorkerDirectory;
    use serde_json::json;

    fn allocator(workers: &[(&str, &str)]) -> TaskAllocator {
        let mut dir = WorkerDirectory::new();
        for (id, agent_type) in workers {
            dir.register(*id, agent_type);
        }
        TaskAllocator::new(Arc::new(dir))
    }

    #[test]
    fn test_builtin_strategies_registered() {
        let allocator = allocator(&[]);
        assert_eq!(
            allocator.strategy_names(),
            vec!["adaptive", "market", "performance", "round_robin"]
        );
        assert_eq!(allocator.default_strategy(), "performance");
    }

    #[test]
    fn test_unknown_strategy_is_configuration_error() {
        let mut allocator = allocator(&[("w1", "etl")]);
        let wf = Workflow::new("wf");

        let err = allocator
            .allocate(&wf, &[], Some("lottery"), None)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(allocator.set_default_strategy("lottery").is_err());
    }

    #[test]
    fn test_omits_unallocatable_tasks() {
        let mut allocator = allocator(&[("w1", "etl")]);
        let mut wf = Workflow::new("wf");
        let typed = wf.add_task(Task::new("a", "").with_agent_type("etl")).unwrap();
        let untyped = wf.add_task(Task::new("b", "")).unwrap();
        let unknown_type = wf.add_task(Task::new("c", "").with_agent_type("gpu")).unwrap();

        let allocations = allocator
            .allocate(&wf, &[typed, untyped, unknown_type], None, None)
            .unwrap();

        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].task_id, typed);
    }

    #[test]
    fn test_outcomes_feed_metrics() {
        let mut allocator = allocator(&[("w1", "etl")]);
        let mut wf = Workflow::new("wf");
        let id = wf.add_task(Task::new("a", "").with_agent_type("etl")).unwrap();

        let allocation = allocator.allocate_task(&wf, &id).unwrap().unwrap();
        allocator.record_assignment(id, allocation.worker_id.clone());
        assert_eq!(allocator.metrics(&allocation.worker_id).active_tasks, 1);

        let task = wf.task_mut(&id).unwrap();
        task.start().unwrap();
        task.complete(json!({})).unwrap();
        let task = wf.task(&id).unwrap().clone();
        allocator.record_outcome(&task, TaskStatus::Completed, None);

        let metrics = allocator.metrics(&allocation.worker_id);
        assert_eq!(metrics.active_tasks, 0);
        assert_eq!(metrics.task_count, 1);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[test]
    fn test_outcome_samples_only_the_last_attempt() {
        let mut allocator = allocator(&[("w1", "etl")]);
        let mut wf = Workflow::new("wf");
        let id = wf
            .add_task(Task::new("a", "").with_agent_type("etl").with_max_retries(1))
            .unwrap();

        let task = wf.task_mut(&id).unwrap();
        task.start().unwrap();
        task.fail("first attempt").unwrap();
        task.reset_for_retry().unwrap();
        task.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(120));

        allocator.record_assignment(id, WorkerId::from("w1"));
        task.start().unwrap();
        task.complete(json!({})).unwrap();
        let task = wf.task(&id).unwrap().clone();
        allocator.record_outcome(&task, TaskStatus::Completed, None);

        let metrics = allocator.metrics(&WorkerId::from("w1"));
        assert_eq!(metrics.task_count, 1);
        assert!(metrics.average_duration < std::time::Duration::from_secs(5));
    }

    struct Fixed;

    impl AllocationStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(
            &self,
            worker: &WorkerId,
            _task: &Task,
            _metrics: &AgentPerformanceMetrics,
            _constraints: &AllocationConstraints,
        ) -> ScoreBreakdown {
            let value = if worker.as_str() == "w2" { 1.0 } else { 0.1 };
            ScoreBreakdown::new().with("fixed", value).finish(1.0)
        }
    }

    #[test]
    fn test_custom_strategy_uses_default_allocate() {
        let mut allocator = allocator(&[("w1", "etl"), ("w2", "etl")]);
        allocator.register_strategy(Box::new(Fixed));
        let mut wf = Workflow::new("wf");
        let id = wf.add_task(Task::new("a", "").with_agent_type("etl")).unwrap();

        let allocations = allocator.allocate(&wf, &[id], Some("fixed"), None).unwrap();

        assert_eq!(allocations[0].worker_id, WorkerId::from("w2"));
        assert_eq!(allocations[0].strategy, "fixed");
    }

    #[test]
    fn test_call_constraints_override_defaults() {
        let mut allocator = allocator(&[("w1", "etl")]).with_constraints(AllocationConstraints {
            excluded_workers: [WorkerId::from("w1")].into(),
            ..Default::default()
        });
        let mut wf = Workflow::new("wf");
        let id = wf.add_task(Task::new("a", "").with_agent_type("etl")).unwrap();

        assert!(allocator.allocate_task(&wf, &id).unwrap().is_none());
        let open = AllocationConstraints::default();
        assert_eq!(
            allocator
                .allocate(&wf, &[id], None, Some(&open))
                .unwrap()
                .len(),
            1
        );
    }
}
