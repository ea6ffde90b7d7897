//! Integration test suite for relay.
//!
//! These tests exercise whole workflows through the engine, allocator and
//! optimizer together.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Full workflow execution tests
//! - `recovery`: Retries, fallbacks, stalls, timeouts and cancellation
//! - `allocation`: Worker selection strategies
//! - `optimization`: Profiling and optimized copies
//!
//! # CI Compatibility
//!
//! Workers are mocked in-process; nothing leaves the test binary.

mod fixtures;

mod allocation;
mod optimization;
mod recovery;
mod workflow_e2e;
