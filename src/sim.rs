//! In-process simulated workers.
//!
//! `relay run` has no real workers to talk to, so it dispatches to a
//! [`SimulatedWorkers`] pool: every request is answered after a fixed
//! latency with a scripted result or failure.

use crate::config::SimConfig;
use crate::core::{WorkerDirectory, Workflow};
use crate::error::{Error, Result};
use crate::execution::{DispatchRequest, Dispatcher, TaskOutcome};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::trace;

/// Agent type given to explicitly named workers whose task has none.
pub const DEFAULT_AGENT_TYPE: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct SimulatedWorkers {
    latency: Duration,
    results: HashMap<String, Value>,
    failures: HashMap<String, u32>,
}

impl SimulatedWorkers {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            results: config.results.clone(),
            failures: config.failures.clone(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reply to tasks named `task` with `result`.
    pub fn with_result(mut self, task: &str, result: Value) -> Self {
        self.results.insert(task.to_string(), result);
        self
    }

    /// Fail the first `attempts` attempts of tasks named `task`.
    pub fn with_failures(mut self, task: &str, attempts: u32) -> Self {
        self.failures.insert(task.to_string(), attempts);
        self
    }

    /// Outcome of one attempt. Without a scripted result the task echoes its input.
    pub fn outcome_for(&self, request: &DispatchRequest) -> TaskOutcome {
        let failing = self.failures.get(&request.task_name).copied().unwrap_or(0);
        if request.attempt <= failing {
            return TaskOutcome::Failed(format!(
                "simulated failure on attempt {}",
                request.attempt
            ));
        }
        let result = self
            .results
            .get(&request.task_name)
            .cloned()
            .unwrap_or_else(|| Value::Object(request.input.clone()));
        TaskOutcome::Completed(result)
    }

    /// Workers for every agent type the workflow needs, plus every worker
    /// a task names explicitly.
    pub fn directory_for(workflow: &Workflow, workers_per_type: usize) -> WorkerDirectory {
        let mut types: BTreeSet<&str> = workflow
            .required_agent_types
            .iter()
            .map(String::as_str)
            .collect();
        types.extend(workflow.tasks().iter().filter_map(|t| t.agent_type.as_deref()));

        let mut directory = WorkerDirectory::new();
        for agent_type in types {
            for n in 1..=workers_per_type.max(1) {
                directory.register(format!("{agent_type}-{n}"), agent_type);
            }
        }
        for task in workflow.tasks() {
            if let Some(worker) = task.agent_id.as_ref() {
                let agent_type = task.agent_type.as_deref().unwrap_or(DEFAULT_AGENT_TYPE);
                directory.register(worker.clone(), agent_type);
            }
        }
        directory
    }
}

impl Dispatcher for SimulatedWorkers {
    fn dispatch(&self, request: DispatchRequest) -> Result<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| Error::Dispatch(e.to_string()))?;
        let outcome = self.outcome_for(&request);
        let latency = self.latency;
        trace!(task = %request.task_name, worker = %request.worker, attempt = request.attempt, "simulating");
        runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            // the runner may already be gone
            let _ = request.reply.send(outcome);
        });
        Ok(())
    }
}
