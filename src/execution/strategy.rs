//! Execution strategies: which tasks to dispatch next.
//!
//! A strategy looks at the workflow after every event and returns the steps
//! the runner should take. Strategies never mutate the workflow; the runner
//! applies condition gates, dispatches, and detects stalls.

use crate::core::{ExecutionMode, FatalKind, TaskGraph, TaskId, TaskStatus, TaskType, Workflow};
use tracing::debug;

/// One action proposed by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Send the task to a worker.
    Dispatch(TaskId),
    /// The workflow cannot continue.
    Fatal(FatalKind, String),
}

/// Dispatch policy for one workflow run.
pub trait ExecutionStrategy: Send + Sync {
    /// Mode this strategy was created for.
    fn mode(&self) -> ExecutionMode;

    /// Mode currently driving dispatch. Differs from `mode` only for
    /// strategies that switch between others.
    fn active_mode(&self) -> ExecutionMode {
        self.mode()
    }

    /// Steps to take now. An empty plan means nothing can start yet.
    fn plan(&mut self, workflow: &Workflow) -> Vec<Step>;
}

/// Strategy for a workflow's execution mode.
pub fn strategy_for(mode: ExecutionMode) -> Box<dyn ExecutionStrategy> {
    match mode {
        ExecutionMode::Sequential => Box::new(SequentialStrategy::new()),
        ExecutionMode::Parallel => Box::new(ParallelStrategy),
        ExecutionMode::Hybrid => Box::new(HybridStrategy),
        ExecutionMode::Adaptive => Box::new(AdaptiveStrategy::new()),
    }
}

// ========== Sequential ==========

/// One task at a time in dependency order, insertion order breaking ties.
///
/// The cursor is the first task in that order that is still pending and is
/// not a reserved fallback, so tasks returned to pending (retries,
/// iterations, released fallbacks) are picked up again.
#[derive(Debug, Default)]
pub struct SequentialStrategy {
    order: Option<Vec<TaskId>>,
    cursor: usize,
}

impl SequentialStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the cursor in the dispatch order.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl ExecutionStrategy for SequentialStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    fn plan(&mut self, workflow: &Workflow) -> Vec<Step> {
        if workflow.active_count() > 0 {
            return Vec::new();
        }
        if self.order.is_none() {
            match workflow.topological_order() {
                Ok(order) => self.order = Some(order),
                Err(e) => {
                    return vec![Step::Fatal(FatalKind::UnsatisfiedDependency, e.to_string())]
                }
            }
        }
        let Some(order) = self.order.as_ref() else {
            return Vec::new();
        };

        let next = order.iter().enumerate().find(|(_, id)| {
            workflow
                .task(id)
                .map(|t| t.status == TaskStatus::Pending && !workflow.is_reserved_fallback(id))
                .unwrap_or(false)
        });
        let Some((position, id)) = next else {
            self.cursor = order.len();
            return Vec::new();
        };
        self.cursor = position;

        match workflow.task(id) {
            Some(task) if workflow.dependencies_satisfied(task) => vec![Step::Dispatch(*id)],
            Some(task) => vec![Step::Fatal(
                FatalKind::UnsatisfiedDependency,
                format!("task '{}' is next but its dependencies are not completed", task.name),
            )],
            None => Vec::new(),
        }
    }
}

// ========== Parallel ==========

/// Every ready task, as soon as it is ready.
#[derive(Debug, Default)]
pub struct ParallelStrategy;

impl ExecutionStrategy for ParallelStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Parallel
    }

    fn plan(&mut self, workflow: &Workflow) -> Vec<Step> {
        workflow.ready_tasks().into_iter().map(Step::Dispatch).collect()
    }
}

// ========== Hybrid ==========

/// Parallel-typed tasks of one batch overlap each other; any other task
/// runs alone.
///
/// With nothing running, the first ready task in insertion order decides:
/// a parallel-typed task opens a batch of every ready task in its
/// `parallel_group`, anything else runs by itself. While a batch runs, only
/// tasks of that batch join it.
#[derive(Debug, Default)]
pub struct HybridStrategy;

impl ExecutionStrategy for HybridStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Hybrid
    }

    fn plan(&mut self, workflow: &Workflow) -> Vec<Step> {
        let batch_of = |id: &TaskId| {
            workflow
                .task(id)
                .filter(|t| t.task_type == TaskType::Parallel)
                .map(|t| t.parallel_group)
        };
        let running: Vec<TaskId> = workflow
            .tasks()
            .iter()
            .filter(|t| t.status.is_active())
            .map(|t| t.id)
            .collect();
        if running.iter().any(|id| batch_of(id).is_none()) {
            return Vec::new();
        }

        let ready = workflow.ready_tasks();
        let batch = |group: Option<u32>| {
            ready
                .iter()
                .filter(|&id| batch_of(id) == Some(group))
                .map(|id| Step::Dispatch(*id))
                .collect::<Vec<_>>()
        };
        if let Some(group) = running.first().and_then(batch_of) {
            return batch(group);
        }
        match ready.first() {
            Some(first) => match batch_of(first) {
                Some(group) => batch(group),
                None => vec![Step::Dispatch(*first)],
            },
            None => Vec::new(),
        }
    }
}

// ========== Adaptive ==========

/// Scores for choosing between sequential and parallel dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeScore {
    pub sequential: f64,
    pub parallel: f64,
}

impl ModeScore {
    /// Score the unfinished part of the workflow.
    ///
    /// A low share of tasks with unfinished dependencies, and many branch
    /// and merge points, favour parallel dispatch. Returns `None` when no
    /// task is left.
    pub fn of(workflow: &Workflow) -> Option<Self> {
        let remaining: Vec<_> = workflow
            .tasks()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .collect();
        if remaining.is_empty() {
            return None;
        }

        let graph = TaskGraph::from_tasks(remaining.iter().copied());
        let total = remaining.len() as f64;
        let dependent = remaining
            .iter()
            .filter(|t| graph.dependency_count_of(&t.id) > 0)
            .count() as f64;
        let dep_ratio = dependent / total;
        let shape = (graph.branch_points().len() + graph.merge_points().len()) as f64;

        let parallel = 0.5 * (1.0 - dep_ratio) + 0.5 * (shape / total * 2.0).min(1.0);
        Some(Self {
            sequential: 1.0 - parallel,
            parallel,
        })
    }

    /// Parallel wins ties.
    pub fn preferred(&self) -> ExecutionMode {
        if self.parallel >= self.sequential {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// Switches between sequential and parallel dispatch as the graph drains.
///
/// Rescored on every plan, i.e. before the first dispatch and after every
/// completion or failure. Switching keeps task statuses and context; the
/// sequential cursor resyncs to the first pending task.
#[derive(Debug)]
pub struct AdaptiveStrategy {
    current: ExecutionMode,
    sequential: SequentialStrategy,
    parallel: ParallelStrategy,
}

impl Default for AdaptiveStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveStrategy {
    pub fn new() -> Self {
        Self {
            current: ExecutionMode::Parallel,
            sequential: SequentialStrategy::new(),
            parallel: ParallelStrategy,
        }
    }
}

impl ExecutionStrategy for AdaptiveStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Adaptive
    }

    fn active_mode(&self) -> ExecutionMode {
        self.current
    }

    fn plan(&mut self, workflow: &Workflow) -> Vec<Step> {
        if let Some(score) = ModeScore::of(workflow) {
            let preferred = score.preferred();
            if preferred != self.current {
                debug!(
                    workflow = %workflow.name,
                    from = %self.current,
                    to = %preferred,
                    parallel = score.parallel,
                    "adaptive strategy switching"
                );
                self.current = preferred;
            }
        }
        match self.current {
            ExecutionMode::Sequential => self.sequential.plan(workflow),
            _ => self.parallel.plan(workflow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Task;
    use serde_json::json;

    fn finish(wf: &mut Workflow, id: &TaskId) {
        let task = wf.task_mut(id).unwrap();
        task.start().unwrap();
        task.complete(json!(null)).unwrap();
    }

    fn dispatched(steps: &[Step]) -> Vec<TaskId> {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::Dispatch(id) => Some(*id),
                Step::Fatal(..) => None,
            })
            .collect()
    }

    #[test]
    fn test_sequential_one_at_a_time_in_order() {
        let mut wf = Workflow::new("wf").with_mode(ExecutionMode::Sequential);
        let a = wf.add_task(Task::new("a", "")).unwrap();
        let b = wf.add_task(Task::new("b", "")).unwrap();
        let mut strategy = SequentialStrategy::new();

        assert_eq!(strategy.plan(&wf), vec![Step::Dispatch(a)]);

        wf.task_mut(&a).unwrap().start().unwrap();
        assert!(strategy.plan(&wf).is_empty());

        wf.task_mut(&a).unwrap().complete(json!(null)).unwrap();
        assert_eq!(strategy.plan(&wf), vec![Step::Dispatch(b)]);
        assert_eq!(strategy.cursor(), 1);
    }

    #[test]
    fn test_sequential_unsatisfied_dependency_is_fatal() {
        let mut wf = Workflow::new("wf");
        let a = wf.add_task(Task::new("a", "")).unwrap();
        wf.add_task(Task::new("b", "").depends_on(a)).unwrap();
        let task = wf.task_mut(&a).unwrap();
        task.start().unwrap();
        task.fail("boom").unwrap();

        let steps = SequentialStrategy::new().plan(&wf);

        assert!(matches!(
            steps.as_slice(),
            [Step::Fatal(FatalKind::UnsatisfiedDependency, _)]
        ));
    }

    #[test]
    fn test_sequential_skips_reserved_fallback() {
        let mut wf = Workflow::new("wf");
        let fallback = wf.add_task(Task::new("fallback", "")).unwrap();
        let primary = wf.add_task(Task::new("primary", "").with_fallback(fallback)).unwrap();

        assert_eq!(SequentialStrategy::new().plan(&wf), vec![Step::Dispatch(primary)]);
    }

    #[test]
    fn test_parallel_dispatches_all_ready() {
        let mut wf = Workflow::new("wf");
        let a = wf.add_task(Task::new("a", "")).unwrap();
        let b = wf.add_task(Task::new("b", "")).unwrap();
        let c = wf.add_task(Task::new("c", "").depends_on(a).depends_on(b)).unwrap();
        let mut strategy = ParallelStrategy;

        assert_eq!(dispatched(&strategy.plan(&wf)), vec![a, b]);

        finish(&mut wf, &a);
        assert_eq!(dispatched(&strategy.plan(&wf)), vec![b]);

        finish(&mut wf, &b);
        assert_eq!(dispatched(&strategy.plan(&wf)), vec![c]);
    }

    #[test]
    fn test_hybrid_parallel_tasks_overlap() {
        let mut wf = Workflow::new("wf");
        let p1 = wf
            .add_task(Task::new("p1", "").with_type(TaskType::Parallel))
            .unwrap();
        let p2 = wf
            .add_task(Task::new("p2", "").with_type(TaskType::Parallel))
            .unwrap();
        let s = wf.add_task(Task::new("s", "")).unwrap();
        let mut strategy = HybridStrategy;

        assert_eq!(dispatched(&strategy.plan(&wf)), vec![p1, p2]);

        wf.task_mut(&p1).unwrap().start().unwrap();
        wf.task_mut(&p2).unwrap().start().unwrap();
        assert!(strategy.plan(&wf).is_empty());

        wf.task_mut(&p1).unwrap().complete(json!(null)).unwrap();
        wf.task_mut(&p2).unwrap().complete(json!(null)).unwrap();
        assert_eq!(dispatched(&strategy.plan(&wf)), vec![s]);
    }

    #[test]
    fn test_hybrid_sequential_task_runs_alone() {
        let mut wf = Workflow::new("wf");
        let s = wf.add_task(Task::new("s", "")).unwrap();
        let p = wf
            .add_task(Task::new("p", "").with_type(TaskType::Parallel))
            .unwrap();
        let mut strategy = HybridStrategy;

        assert_eq!(dispatched(&strategy.plan(&wf)), vec![s]);

        wf.task_mut(&s).unwrap().start().unwrap();
        assert!(strategy.plan(&wf).is_empty());

        wf.task_mut(&s).unwrap().complete(json!(null)).unwrap();
        assert_eq!(dispatched(&strategy.plan(&wf)), vec![p]);
    }

    #[test]
    fn test_hybrid_batches_one_group_at_a_time() {
        let mut wf = Workflow::new("wf");
        let a = wf.add_task(Task::new("a", "").in_parallel_group(0)).unwrap();
        let b = wf.add_task(Task::new("b", "").in_parallel_group(0)).unwrap();
        let c = wf.add_task(Task::new("c", "").in_parallel_group(1)).unwrap();
        let d = wf.add_task(Task::new("d", "").in_parallel_group(1)).unwrap();
        let mut strategy = HybridStrategy;

        assert_eq!(dispatched(&strategy.plan(&wf)), vec![a, b]);

        wf.task_mut(&a).unwrap().start().unwrap();
        wf.task_mut(&b).unwrap().start().unwrap();
        wf.task_mut(&a).unwrap().complete(json!(null)).unwrap();
        // b still running: group 1 waits for it
        assert!(strategy.plan(&wf).is_empty());

        wf.task_mut(&b).unwrap().complete(json!(null)).unwrap();
        assert_eq!(dispatched(&strategy.plan(&wf)), vec![c, d]);
    }

    #[test]
    fn test_mode_score_chain_prefers_sequential() {
        let mut wf = Workflow::new("wf");
        let a = wf.add_task(Task::new("a", "")).unwrap();
        let b = wf.add_task(Task::new("b", "").depends_on(a)).unwrap();
        wf.add_task(Task::new("c", "").depends_on(b)).unwrap();

        let score = ModeScore::of(&wf).unwrap();
        assert_eq!(score.preferred(), ExecutionMode::Sequential);
    }

    #[test]
    fn test_mode_score_independent_prefers_parallel() {
        let mut wf = Workflow::new("wf");
        for i in 0..3 {
            wf.add_task(Task::new(&format!("t{}", i), "")).unwrap();
        }
        assert_eq!(ModeScore::of(&wf).unwrap().preferred(), ExecutionMode::Parallel);
        assert!(ModeScore::of(&Workflow::new("empty")).is_none());
    }

    #[test]
    fn test_adaptive_switches_as_graph_drains() {
        // a -> b -> c chain plus nothing else: sequential until only c is left
        let mut wf = Workflow::new("wf");
        let a = wf.add_task(Task::new("a", "")).unwrap();
        let b = wf.add_task(Task::new("b", "").depends_on(a)).unwrap();
        let c = wf.add_task(Task::new("c", "").depends_on(b)).unwrap();
        let mut strategy = AdaptiveStrategy::new();

        assert_eq!(strategy.plan(&wf), vec![Step::Dispatch(a)]);
        assert_eq!(strategy.active_mode(), ExecutionMode::Sequential);

        finish(&mut wf, &a);
        finish(&mut wf, &b);
        assert_eq!(strategy.plan(&wf), vec![Step::Dispatch(c)]);
        assert_eq!(strategy.active_mode(), ExecutionMode::Parallel);
        assert_eq!(strategy.mode(), ExecutionMode::Adaptive);
    }
}
