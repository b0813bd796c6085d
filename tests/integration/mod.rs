//! Integration test suite for the orchestration engine.
//!
//! These tests exercise the public API end to end: building task DAGs,
//! driving assignment through the orchestrator with host events, and
//! restarting against persisted state.
//!
//! # Test Categories
//!
//! - `lifecycle`: Task DAG and state machine behavior through the queue
//! - `engine`: Orchestrator scenarios from creation to completion
//! - `recovery`: Persistence, restart reconciliation, and checkpoints
//!
//! All external collaborators are in-memory doubles; no processes are
//! spawned and nothing touches the network.

mod fixtures;

mod engine;
mod lifecycle;
