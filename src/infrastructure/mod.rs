//! Infrastructure layer: adapters for external dependencies the domain and
//! engine layers depend on through traits only.
//!
//! - `config`: figment-based YAML + env layering for process-level settings
//!   (§6.7) that don't live in the canonical issue record.
//! - `logging`: `tracing-subscriber` registry setup (stdout + optional file
//!   rotation).
//! - `git`: the real [`crate::domain::ports::GitOps`] implementation that
//!   shells out to the `git` binary.

pub mod config;
pub mod git;
pub mod logging;

pub use config::{ConfigLoader, LoggingSettings, OrchestratorConfig};
pub use git::CliGitOps;
pub use logging::LoggerImpl;
