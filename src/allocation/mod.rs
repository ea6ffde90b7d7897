//! Worker allocation.
//!
//! The allocator picks a worker for each ready task using one of several
//! named strategies, and tracks per-worker performance so later choices
//! improve.

pub mod adaptive;
pub mod allocator;
pub mod market;
pub mod metrics;
pub mod performance;
pub mod round_robin;
pub mod strategy;

pub use adaptive::{AdaptiveDecision, AdaptiveStrategy};
pub use allocator::{TaskAllocator, DEFAULT_STRATEGY};
pub use market::MarketStrategy;
pub use metrics::{AgentPerformanceMetrics, PerformanceTracker, DEFAULT_WORKER_CAPACITY};
pub use performance::PerformanceStrategy;
pub use round_robin::RoundRobinStrategy;
pub use strategy::{
    Allocation, AllocationConstraints, AllocationContext, AllocationStrategy, ScoreBreakdown,
};
