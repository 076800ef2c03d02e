//! wavebed - crash-safe parallel wave orchestrator for issue-resolution
//! task graphs.
//!
//! Drives a decomposed issue's tasks concurrently through an implement
//! phase and a spec-check phase, with crash-safe state, deterministic
//! resumption, bounded concurrency, timeouts, and serial branch
//! integration. Workers are external processes; this crate owns only the
//! wave engine, recovery protocol, and merge integration that sit around
//! them.

pub mod cli;
pub mod domain;
pub mod engine;
pub mod infrastructure;
pub mod progress;
pub mod sandbox;
pub mod state;
pub mod supervisor;

pub use domain::errors::{OrchestratorError, OrchestratorResult};
