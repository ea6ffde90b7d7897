//! Workflow definition files.
//!
//! Definitions are the on-disk form of a workflow: TOML or JSON, with tasks
//! referring to each other by name. [`WorkflowDefinition::build`] turns one
//! into a validated [`Workflow`].

use crate::core::condition::Condition;
use crate::core::task::{Context, Task, TaskId, TaskType, DEFAULT_MAX_ITERATIONS};
use crate::core::worker::WorkerId;
use crate::core::workflow::{CoordinationStrategy, ExecutionMode, Workflow};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A workflow as written in a definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub coordination: Option<CoordinationStrategy>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub priority: Option<u8>,
    /// Initial workflow context.
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

/// A task as written in a definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Names of tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub fallback: Option<String>,
    /// Input field -> context key.
    #[serde(default)]
    pub input: HashMap<String, String>,
    /// Result field -> context key.
    #[serde(default)]
    pub output: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub estimated_secs: Option<f64>,
    /// Expression condition, e.g. `rows > 10 && !dry_run`.
    #[serde(default)]
    pub condition: Option<String>,
    /// Name of a host-registered predicate.
    #[serde(default)]
    pub predicate: Option<String>,
    /// Name of an external event.
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl WorkflowDefinition {
    /// Load a definition, picking the format from the file extension.
    ///
    /// `.json` files are read as JSON; everything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading workflow definition");
        let source = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_toml_str(&source)
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Build a validated workflow.
    ///
    /// Tasks keep their file order. References are resolved by name after
    /// every task exists, so a task may depend on one declared later.
    ///
    /// # Errors
    /// - `Error::Validation` for duplicate task names or an ambiguous condition
    /// - `Error::TaskNotFound` for a reference to an undeclared task
    /// - `Error::CycleDetected` if the dependencies form a cycle
    /// - `Error::Condition` if a condition expression does not parse
    pub fn build(&self) -> Result<Workflow> {
        let mut workflow = Workflow::new(&self.name).with_max_retries(self.max_retries);
        workflow.description = self.description.clone();
        workflow.execution_mode = self.execution_mode;
        workflow.coordination = self.coordination;
        workflow.timeout = self.timeout_secs.map(secs);
        if let Some(priority) = self.priority {
            workflow = workflow.with_priority(priority);
        }
        workflow.context = self.context.clone();

        let mut ids: HashMap<&str, TaskId> = HashMap::new();
        for def in &self.tasks {
            if ids.contains_key(def.name.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate task name '{}'",
                    def.name
                )));
            }
            let id = workflow.add_task(def.to_task()?)?;
            ids.insert(def.name.as_str(), id);
        }

        let resolve = |name: &str| {
            ids.get(name)
                .copied()
                .ok_or_else(|| Error::TaskNotFound(name.to_string()))
        };

        for def in &self.tasks {
            let id = resolve(&def.name)?;
            for dep in &def.depends_on {
                let dep_id = resolve(dep)?;
                workflow
                    .add_dependency(&id, &dep_id)
                    .map_err(|e| match e {
                        Error::CycleDetected(_) => Error::CycleDetected(def.name.clone()),
                        other => other,
                    })?;
            }
            if let Some(fallback) = &def.fallback {
                workflow.set_fallback(&id, &resolve(fallback)?)?;
            }
            let subtasks = def
                .subtasks
                .iter()
                .map(|s| resolve(s))
                .collect::<Result<Vec<_>>>()?;
            if let Some(task) = workflow.task_mut(&id) {
                task.subtasks = subtasks;
            }
        }

        workflow.validate()?;
        debug!(
            workflow = %workflow.name,
            tasks = workflow.task_count(),
            "workflow definition built"
        );
        Ok(workflow)
    }
}

impl TaskDefinition {
    fn condition(&self) -> Result<Option<Condition>> {
        let given = [
            self.condition.is_some(),
            self.predicate.is_some(),
            self.event.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if given > 1 {
            return Err(Error::Validation(format!(
                "task '{}' sets more than one of condition, predicate, event",
                self.name
            )));
        }

        if let Some(expr) = &self.condition {
            return Condition::expression(expr).map(Some);
        }
        if let Some(name) = &self.predicate {
            return Ok(Some(Condition::predicate(name)));
        }
        Ok(self.event.as_deref().map(Condition::event))
    }

    /// Task without graph references; those are linked by the workflow build.
    fn to_task(&self) -> Result<Task> {
        let mut task = Task::new(&self.name, &self.description).with_type(self.task_type);
        task.agent_type = self.agent_type.clone();
        task.agent_id = self.agent_id.as_deref().map(WorkerId::from);
        task.input_mapping = self.input.clone();
        task.output_mapping = self.output.clone();
        task.timeout = self.timeout_secs.map(secs);
        task.max_retries = self.max_retries;
        task.estimated_duration = self.estimated_secs.map(secs);
        task.condition = self.condition()?;
        task.domain = self.domain.clone();
        task.critical = self.critical;
        task.max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if let Some(priority) = self.priority {
            task = task.with_priority(priority);
        }
        Ok(task)
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskStatus;
    use serde_json::json;
    use std::io::Write;

    const PIPELINE: &str = r#"
name = "nightly"
execution_mode = "sequential"
max_retries = 2
timeout_secs = 120

[context]
source = "s3://bucket"

[[tasks]]
name = "load"
agent_type = "etl"
depends_on = ["transform"]

[[tasks]]
name = "extract"
agent_type = "etl"
input = { url = "source" }
output = { rows = "raw_rows" }
priority = 8

[[tasks]]
name = "transform"
type = "conditional"
agent_type = "etl"
depends_on = ["extract"]
condition = "raw_rows > 0"
fallback = "cleanup"
max_retries = 0

[[tasks]]
name = "cleanup"
agent_type = "etl"
"#;

    #[test]
    fn test_build_from_toml() {
        let wf = WorkflowDefinition::from_toml_str(PIPELINE)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(wf.name, "nightly");
        assert_eq!(wf.execution_mode, ExecutionMode::Sequential);
        assert_eq!(wf.timeout, Some(Duration::from_secs(120)));
        assert_eq!(wf.context.get("source"), Some(&json!("s3://bucket")));

        let names: Vec<&str> = wf.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["load", "extract", "transform", "cleanup"]);

        let extract = wf.task_by_name("extract").unwrap();
        let transform = wf.task_by_name("transform").unwrap();
        let load = wf.task_by_name("load").unwrap();
        let cleanup = wf.task_by_name("cleanup").unwrap();

        assert_eq!(extract.priority, 8);
        assert_eq!(extract.retry_limit(), 2);
        assert_eq!(extract.status, TaskStatus::Pending);
        assert_eq!(transform.retry_limit(), 0);
        assert_eq!(transform.dependencies, vec![extract.id]);
        assert_eq!(transform.fallback, Some(cleanup.id));
        assert!(transform.condition.is_some());
        assert_eq!(load.dependencies, vec![transform.id]);

        let order = wf.topological_order().unwrap();
        assert_eq!(order, vec![extract.id, transform.id, load.id, cleanup.id]);
    }

    #[test]
    fn test_unknown_reference() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
name = "wf"
[[tasks]]
name = "a"
depends_on = ["ghost"]
"#,
        )
        .unwrap();
        assert!(matches!(def.build(), Err(Error::TaskNotFound(name)) if name == "ghost"));
    }

    #[test]
    fn test_duplicate_names() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
name = "wf"
[[tasks]]
name = "a"
[[tasks]]
name = "a"
"#,
        )
        .unwrap();
        assert!(matches!(def.build(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_cycle_rejected() {
        let def = WorkflowDefinition::from_json_str(
            r#"{
                "name": "wf",
                "tasks": [
                    {"name": "a", "depends_on": ["b"]},
                    {"name": "b", "depends_on": ["a"]}
                ]
            }"#,
        )
        .unwrap();
        assert!(matches!(def.build(), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn test_bad_condition() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
name = "wf"
[[tasks]]
name = "a"
condition = "x >"
"#,
        )
        .unwrap();
        assert!(matches!(def.build(), Err(Error::Condition(_))));
    }

    #[test]
    fn test_conflicting_conditions() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
name = "wf"
[[tasks]]
name = "a"
predicate = "ready"
event = "go"
"#,
        )
        .unwrap();
        assert!(matches!(def.build(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("wf.json");
        let mut file = fs::File::create(&json_path).unwrap();
        write!(file, r#"{{"name": "from-json", "tasks": [{{"name": "a"}}]}}"#).unwrap();

        let toml_path = dir.path().join("wf.toml");
        fs::write(&toml_path, "name = \"from-toml\"\n").unwrap();

        assert_eq!(WorkflowDefinition::load(&json_path).unwrap().name, "from-json");
        assert_eq!(WorkflowDefinition::load(&toml_path).unwrap().name, "from-toml");
    }

    #[test]
    fn test_predicate_and_event_conditions() {
        let def = WorkflowDefinition::from_toml_str(
            r#"
name = "wf"
[[tasks]]
name = "a"
predicate = "ready"
[[tasks]]
name = "b"
event = "approved"
"#,
        )
        .unwrap();
        let wf = def.build().unwrap();
        assert_eq!(
            wf.task_by_name("a").unwrap().condition,
            Some(Condition::predicate("ready"))
        );
        assert_eq!(
            wf.task_by_name("b").unwrap().condition,
            Some(Condition::event("approved"))
        );
    }
}
