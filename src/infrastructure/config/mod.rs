//! Process-level configuration (§6.7): the knobs the canonical issue record
//! doesn't carry — binary paths, directories, logging. Layered with
//! `figment` the way `abathur::infrastructure::config` layers its own
//! `Config`.

mod loader;

pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub rotation: RotationPolicy,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_state_root() -> PathBuf {
    PathBuf::from(".orchestrator/state")
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_runner_bin() -> String {
    "orchestrator-worker".to_string()
}

fn default_workflow_name() -> String {
    "default".to_string()
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("./workflows")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("./prompts")
}

/// Process-level settings (§6.7), distinct from the per-issue
/// `settings.taskExecution` read out of the canonical issue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Parent directory of `<issueId>/` canonical state directories.
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    /// Canonical repository working directory / branch root.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    /// `<runner_bin>` from the §6.2 spawn contract.
    #[serde(default = "default_runner_bin")]
    pub runner_bin: String,
    #[serde(default = "default_workflow_name")]
    pub workflow_name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            repo_path: default_repo_path(),
            runner_bin: default_runner_bin(),
            workflow_name: default_workflow_name(),
            provider: default_provider(),
            workflows_dir: default_workflows_dir(),
            prompts_dir: default_prompts_dir(),
            logging: LoggingSettings::default(),
        }
    }
}
