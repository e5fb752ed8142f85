//! Session orchestration modules.
//!
//! Covers the session state machine, message fan-out, progress
//! aggregation, the single-flight operation orchestrator, and debounced
//! auto-resolve.

pub mod auto_resolve;
pub mod event_bus;
pub mod operations;
pub mod progress;
pub mod session;
