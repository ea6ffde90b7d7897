//! Task dependency graph.
//!
//! `TaskGraph` is a petgraph view over a workflow's tasks, built on demand
//! for the algorithms that need real graph structure: cycle detection,
//! topological ordering, reachability, and branch/merge analysis. Edges point
//! from a dependency to the task that depends on it.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{DfsPostOrder, Reversed};
use petgraph::Direction;
use std::collections::HashMap;

/// Dependency graph over task ids.
pub struct TaskGraph {
    /// Nodes are task ids in insertion order; edges run dependency -> dependent.
    graph: DiGraph<TaskId, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Build the graph from tasks. Dependencies on unknown ids are ignored.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let tasks: Vec<&Task> = tasks.into_iter().collect();
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut task_index = HashMap::with_capacity(tasks.len());

        for task in &tasks {
            let index = graph.add_node(task.id);
            task_index.insert(task.id, index);
        }
        for task in &tasks {
            let to = task_index[&task.id];
            for dep in &task.dependencies {
                if let Some(&from) = task_index.get(dep) {
                    if graph.find_edge(from, to).is_none() {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        Self { graph, task_index }
    }

    /// Get the number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependency edges in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Add an edge `from -> to`, rejecting it if it would close a cycle.
    ///
    /// # Errors
    /// Returns an error if either task is unknown or the edge creates a cycle.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = *self
            .task_index
            .get(from)
            .ok_or_else(|| Error::TaskNotFound(from.to_string()))?;
        let to_index = *self
            .task_index
            .get(to)
            .ok_or_else(|| Error::TaskNotFound(to.to_string()))?;

        if self.graph.find_edge(from_index, to_index).is_some() {
            return Ok(());
        }

        // Temporarily add the edge to check for cycles
        let edge = self.graph.add_edge(from_index, to_index, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::CycleDetected(to.to_string()));
        }
        Ok(())
    }

    /// Whether the graph contains a dependency cycle.
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// A task that sits on a cycle, if any.
    pub fn cycle_member(&self) -> Option<TaskId> {
        toposort(&self.graph, None)
            .err()
            .and_then(|cycle| self.graph.node_weight(cycle.node_id()).copied())
    }

    /// Tasks in dependency order.
    ///
    /// Depth-first post-order over the dependency edges, starting from each
    /// task in insertion order: every task appears after all of its
    /// dependencies, and independent tasks keep their insertion order.
    ///
    /// # Errors
    /// Returns `Error::CycleDetected` if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        if let Some(member) = self.cycle_member() {
            return Err(Error::CycleDetected(member.to_string()));
        }

        let reversed = Reversed(&self.graph);
        let mut order = Vec::with_capacity(self.graph.node_count());
        let mut nodes = self.graph.node_indices();
        let Some(first) = nodes.next() else {
            return Ok(order);
        };

        let mut dfs = DfsPostOrder::new(reversed, first);
        while let Some(index) = dfs.next(reversed) {
            order.push(self.graph[index]);
        }
        for start in nodes {
            if dfs.discovered.contains(start.index()) {
                continue;
            }
            dfs.move_to(start);
            while let Some(index) = dfs.next(reversed) {
                order.push(self.graph[index]);
            }
        }
        Ok(order)
    }

    /// Whether `to` is reachable from `from` through dependency edges.
    pub fn has_path(&self, from: &TaskId, to: &TaskId) -> bool {
        match (self.task_index.get(from), self.task_index.get(to)) {
            (Some(&a), Some(&b)) if a != b => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// Whether either task transitively depends on the other.
    pub fn are_dependent(&self, a: &TaskId, b: &TaskId) -> bool {
        self.has_path(a, b) || self.has_path(b, a)
    }

    /// Number of tasks that directly depend on `id`.
    pub fn dependent_count(&self, id: &TaskId) -> usize {
        self.neighbor_count(id, Direction::Outgoing)
    }

    /// Number of direct dependencies of `id`.
    pub fn dependency_count_of(&self, id: &TaskId) -> usize {
        self.neighbor_count(id, Direction::Incoming)
    }

    /// Tasks with more than one dependent.
    pub fn branch_points(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter(|&i| self.graph.neighbors_directed(i, Direction::Outgoing).count() > 1)
            .map(|i| self.graph[i])
            .collect()
    }

    /// Tasks with more than one dependency.
    pub fn merge_points(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter(|&i| self.graph.neighbors_directed(i, Direction::Incoming).count() > 1)
            .map(|i| self.graph[i])
            .collect()
    }

    /// Length (in tasks) of the longest dependency chain.
    pub fn longest_chain(&self) -> usize {
        let Ok(order) = self.topological_order() else {
            return 0;
        };
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut longest = 0;
        for id in order {
            let index = self.task_index[&id];
            let d = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .max()
                .map_or(1, |d| d + 1);
            depth.insert(index, d);
            longest = longest.max(d);
        }
        longest
    }

    fn neighbor_count(&self, id: &TaskId, direction: Direction) -> usize {
        self.task_index
            .get(id)
            .map(|&i| self.graph.neighbors_directed(i, direction).count())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
