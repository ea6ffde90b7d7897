//! Workflow execution.
//!
//! A [`WorkflowRunner`] drives one workflow through its execution strategy,
//! handing tasks to a [`Dispatcher`] and applying their outcomes. The
//! [`Engine`] runs many workflows at once over a shared allocator.

pub mod dispatch;
pub mod engine;
pub mod events;
pub mod runner;
pub mod strategy;

pub use dispatch::{CompletionSender, DispatchRequest, Dispatcher, RunnerMessage, TaskOutcome};
pub use engine::{Engine, ExecutionHandle};
pub use events::ExecutionEvent;
pub use runner::{RunnerHandle, SharedAllocator, WorkflowRunner};
pub use strategy::{
    strategy_for, AdaptiveStrategy, ExecutionStrategy, HybridStrategy, ModeScore,
    ParallelStrategy, SequentialStrategy, Step,
};
