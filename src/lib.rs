//! Relay: a DAG workflow orchestration engine.
//!
//! Workflows are graphs of tasks with dependencies, retries, fallbacks and
//! conditions. The [`execution`] engine schedules them under a sequential,
//! parallel, hybrid or adaptive strategy, [`allocation`] picks a worker for
//! each task, and the [`optimizer`] profiles a run and proposes a faster copy.

pub mod allocation;
pub mod config;
pub mod core;
pub mod error;
pub mod execution;
pub mod log;
pub mod optimizer;
pub mod sim;

pub use error::{Error, Result};
