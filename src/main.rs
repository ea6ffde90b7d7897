use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use relay::config::Config;
use relay::core::{TaskId, Workflow, WorkflowDefinition, WorkflowStatus};
use relay::execution::Engine;
use relay::optimizer::{
    OptimizationChange, OptimizationLevel, OptimizationResult, WorkflowOptimizer,
};
use relay::sim::SimulatedWorkers;
use relay::Result;

/// Relay - DAG workflow orchestration engine
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RELAY_DEBUG=1     Enable debug logging (alternative to --debug)\n    RELAY_LOG=<filter>  Full tracing filter, e.g. relay::execution=trace")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.relay/relay.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a workflow definition against simulated workers
    Run {
        /// Workflow definition (.toml or .json)
        file: PathBuf,

        /// Print every execution event as a JSON line
        #[arg(long)]
        events: bool,

        /// Print the final workflow as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow definition without running it
    Validate {
        /// Workflow definition (.toml or .json)
        file: PathBuf,
    },

    /// Profile a workflow definition and propose an optimized copy
    Optimize {
        /// Workflow definition (.toml or .json)
        file: PathBuf,

        /// light, moderate or aggressive (default from config)
        #[arg(long)]
        level: Option<OptimizationLevel>,

        /// Cap on parallel tasks in the optimized workflow
        #[arg(long)]
        max_parallelism: Option<usize>,

        /// Do not move tasks between workers
        #[arg(long)]
        no_reallocation: bool,

        /// Print the full optimization result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    relay::log::init_with_debug(cli.debug);
    info!(debug = relay::log::is_debug(), "relay starting");

    match cli.command {
        Command::Run { file, events, json } => run_workflow(&file, events, json),
        Command::Validate { file } => run_validate(&file),
        Command::Optimize {
            file,
            level,
            max_parallelism,
            no_reallocation,
            json,
        } => run_optimize(&file, level, max_parallelism, no_reallocation, json),
    }
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    WorkflowDefinition::load(file)?.build()
}

fn run_workflow(file: &Path, print_events: bool, json: bool) -> Result<()> {
    let config = Config::load()?;
    let mut workflow = load_workflow(file)?;
    config.engine.apply(&mut workflow);

    let directory = SimulatedWorkers::directory_for(&workflow, config.sim.workers_per_type);
    let allocator = config.allocation.build_allocator(Arc::new(directory))?;
    let workers = SimulatedWorkers::new(&config.sim);

    if !json {
        println!(
            "Running workflow: {} ({} tasks, {} mode)",
            workflow.name,
            workflow.task_count(),
            workflow.execution_mode
        );
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let finished = runtime.block_on(async move {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(allocator, Arc::new(workers)).with_events(events_tx);
        let printer = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if print_events {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{}", line);
                    }
                }
                if event.is_terminal() {
                    break;
                }
            }
        });
        let result = engine.run(workflow).await;
        drop(engine);
        let _ = printer.await;
        result
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        print_summary(&finished);
    }
    if finished.status != WorkflowStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(workflow: &Workflow) {
    println!();
    println!("  Workflow ID: {}", workflow.id.short());
    println!("  Status:      {}", workflow.status);
    if let Some(elapsed) = workflow.elapsed() {
        println!("  Elapsed:     {:.2}s", elapsed.as_secs_f64());
    }
    println!();
    for task in workflow.tasks() {
        let worker = task
            .assigned_worker
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<10} {:<14} attempts={}",
            task.name, task.status, worker, task.attempts
        );
    }
    if !workflow.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &workflow.errors {
            println!("  [{:?}] {}", error.kind, error.message);
        }
    }
}

fn run_validate(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    let order = workflow.topological_order()?;
    let graph = workflow.graph();

    println!("{} is valid", file.display());
    println!("  Name:          {}", workflow.name);
    println!("  Mode:          {}", workflow.execution_mode);
    println!("  Tasks:         {}", workflow.task_count());
    println!("  Dependencies:  {}", graph.dependency_count());
    println!("  Longest chain: {}", graph.longest_chain());
    println!();
    println!("Execution order:");
    for (i, id) in order.iter().enumerate() {
        if let Some(task) = workflow.task(id) {
            println!("  {:>3}. {} ({})", i + 1, task.name, task.task_type);
        }
    }
    Ok(())
}

fn run_optimize(
    file: &Path,
    level: Option<OptimizationLevel>,
    max_parallelism: Option<usize>,
    no_reallocation: bool,
    json: bool,
) -> Result<()> {
    let config = Config::load()?;
    let workflow = load_workflow(file)?;

    let mut options = config.optimizer.options();
    if let Some(level) = level {
        options.level = level;
    }
    if max_parallelism.is_some() {
        options.max_parallelism = max_parallelism;
    }
    if no_reallocation {
        options.allow_reallocations = false;
    }

    let optimizer = WorkflowOptimizer::with_options(options);
    let profile = optimizer.profile(&workflow, None);
    let result = optimizer.optimize(&workflow, &profile, None);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_optimization(&workflow, &result);
    }
    Ok(())
}

fn print_optimization(original: &Workflow, result: &OptimizationResult) {
    let name_of = |id: &TaskId| {
        result
            .workflow
            .task(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.short())
    };

    println!("Optimization of {}", original.name);
    println!(
        "  Estimated duration: {:.1}s -> {:.1}s ({:.1}% faster)",
        result.estimated_duration_before.as_secs_f64(),
        result.estimated_duration_after.as_secs_f64(),
        result.improvement.duration_pct
    );
    println!("  Mode: {} -> {}", original.execution_mode, result.workflow.execution_mode);
    println!();

    if result.is_unchanged() {
        println!("No changes.");
    } else {
        println!("Changes:");
        for change in &result.changes {
            match change {
                OptimizationChange::Parallelized {
                    tasks,
                    estimated_speedup,
                } => {
                    let names: Vec<String> = tasks.iter().map(name_of).collect();
                    println!(
                        "  parallelize [{}] (x{:.2})",
                        names.join(", "),
                        estimated_speedup
                    );
                }
                OptimizationChange::DependencyRemoved { task, dependency } => {
                    println!("  drop dependency {} -> {}", name_of(task), name_of(dependency));
                }
                OptimizationChange::ModePromoted { from, to } => {
                    println!("  promote mode {} -> {}", from, to);
                }
                OptimizationChange::Reallocated { task, from, to } => {
                    println!("  move {} from {} to {}", name_of(task), from, to);
                }
            }
        }
    }

    if !result.remaining_bottlenecks.is_empty() {
        println!();
        println!("Remaining bottlenecks:");
        for bottleneck in &result.remaining_bottlenecks {
            println!(
                "  [{}] {} (severity {})",
                bottleneck.kind, bottleneck.description, bottleneck.severity
            );
        }
    }
    if !result.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for recommendation in &result.recommendations {
            println!("  - {}", recommendation);
        }
    }
}
