//! Worker identity and the worker registry contract.
//!
//! Workers are external processes; the scheduler only needs to look them up
//! by capability (agent type) and check that an explicit id exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of an external worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lookup of workers by capability.
pub trait WorkerRegistry: Send + Sync {
    /// Workers able to run `agent_type`, in registration order.
    fn workers_by_type(&self, agent_type: &str) -> Vec<WorkerId>;

    /// Whether the worker is known.
    fn contains(&self, worker: &WorkerId) -> bool;

    /// Agent type the worker was registered with.
    fn worker_type(&self, worker: &WorkerId) -> Option<String>;
}

/// In-memory worker registry.
///
/// Keeps registration order, which round-robin allocation relies on.
#[derive(Debug, Clone, Default)]
pub struct WorkerDirectory {
    order: Vec<WorkerId>,
    types: HashMap<WorkerId, String>,
}

impl WorkerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Re-registering updates its type but keeps its position.
    pub fn register(&mut self, worker: impl Into<WorkerId>, agent_type: &str) {
        let worker = worker.into();
        if !self.types.contains_key(&worker) {
            self.order.push(worker.clone());
        }
        self.types.insert(worker, agent_type.to_string());
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_worker(mut self, worker: impl Into<WorkerId>, agent_type: &str) -> Self {
        self.register(worker, agent_type);
        self
    }

    pub fn unregister(&mut self, worker: &WorkerId) -> bool {
        if self.types.remove(worker).is_some() {
            self.order.retain(|w| w != worker);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn all(&self) -> &[WorkerId] {
        &self.order
    }
}

impl WorkerRegistry for WorkerDirectory {
    fn workers_by_type(&self, agent_type: &str) -> Vec<WorkerId> {
        self.order
            .iter()
            .filter(|w| self.types.get(*w).map(String::as_str) == Some(agent_type))
            .cloned()
            .collect()
    }

    fn contains(&self, worker: &WorkerId) -> bool {
        self.types.contains_key(worker)
    }

    fn worker_type(&self, worker: &WorkerId) -> Option<String> {
        self.types.get(worker).cloned()
    }
}
