use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::allocation::{AllocationConstraints, TaskAllocator, DEFAULT_WORKER_CAPACITY};
use crate::core::{ExecutionMode, WorkerRegistry, Workflow};
use crate::optimizer::{OptimizationLevel, OptimizationOptions};
use crate::{Error, Result};

/// Settings read from `~/.relay/relay.toml`. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub allocation: AllocationConfig,
    pub optimizer: OptimizerConfig,
    pub sim: SimConfig,
}

/// Overrides applied to workflows before they run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: Option<ExecutionMode>,
    pub timeout_secs: Option<f64>,
}

impl EngineConfig {
    /// Override the workflow's execution mode, and set its timeout if it has none.
    pub fn apply(&self, workflow: &mut Workflow) {
        if let Some(mode) = self.mode {
            workflow.execution_mode = mode;
        }
        if workflow.timeout.is_none() {
            if let Some(secs) = self.timeout_secs.filter(|s| *s > 0.0) {
                workflow.timeout = Some(Duration::from_secs_f64(secs));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocationConfig {
    pub strategy: String,
    pub worker_capacity: usize,
    pub constraints: AllocationConstraints,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            strategy: crate::allocation::DEFAULT_STRATEGY.to_string(),
            worker_capacity: DEFAULT_WORKER_CAPACITY,
            constraints: AllocationConstraints::default(),
        }
    }
}

impl AllocationConfig {
    /// Build an allocator over `registry` with these settings.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for an unknown strategy name.
    pub fn build_allocator(&self, registry: Arc<dyn WorkerRegistry>) -> Result<TaskAllocator> {
        TaskAllocator::new(registry)
            .with_capacity(self.worker_capacity)
            .with_constraints(self.constraints.clone())
            .with_default_strategy(&self.strategy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub level: OptimizationLevel,
    pub max_parallelism: Option<usize>,
    pub allow_reallocations: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let options = OptimizationOptions::default();
        Self {
            level: options.level,
            max_parallelism: options.max_parallelism,
            allow_reallocations: options.allow_reallocations,
        }
    }
}

impl OptimizerConfig {
    pub fn options(&self) -> OptimizationOptions {
        OptimizationOptions {
            level: self.level,
            max_parallelism: self.max_parallelism,
            allow_reallocations: self.allow_reallocations,
        }
    }
}

/// Behaviour of the simulated worker pool used by `relay run`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Delay before a simulated worker replies.
    pub latency_ms: u64,
    /// Workers registered for every agent type the workflow needs.
    pub workers_per_type: usize,
    /// Result returned by tasks of a given name. Unscripted tasks echo their input.
    pub results: HashMap<String, Value>,
    /// Number of leading attempts that fail, by task name.
    pub failures: HashMap<String, u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            latency_ms: 50,
            workers_per_type: 2,
            results: HashMap::new(),
            failures: HashMap::new(),
        }
    }
}

impl Config {
    pub fn relay_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".relay"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::relay_dir()?.join("relay.toml"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::relay_dir()?.join("relay.log"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            mode = ?config.engine.mode,
            strategy = %config.allocation.strategy,
            level = %config.optimizer.level,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!(dir = %dir.display(), "creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }
}
