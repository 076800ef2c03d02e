//! Hierarchical config loading, mirroring
//! `abathur::infrastructure::config::ConfigLoader`'s
//! `Figment::new().merge(Serialized::defaults(...)).merge(Yaml::file(...))
//! .merge(Env::prefixed(...))` layering.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::OrchestratorConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("runner_bin must not be empty")]
    EmptyRunnerBin,
    #[error("workflow_name must not be empty")]
    EmptyWorkflowName,
    #[error("invalid log level: {0}. must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults.
    /// 2. `orchestrator.yaml` in the current directory.
    /// 3. `ORCHESTRATOR_`-prefixed environment variables.
    pub fn load() -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file("orchestrator.yaml"))
            .merge(Env::prefixed("ORCHESTRATOR_").split("__"))
            .extract()
            .context("failed to extract orchestrator configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &OrchestratorConfig) -> Result<(), ConfigError> {
        if config.runner_bin.trim().is_empty() {
            return Err(ConfigError::EmptyRunnerBin);
        }
        if config.workflow_name.trim().is_empty() {
            return Err(ConfigError::EmptyWorkflowName);
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::LogFormat;

    #[test]
    fn default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.runner_bin, "orchestrator-worker");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn rejects_empty_runner_bin() {
        let mut config = OrchestratorConfig::default();
        config.runner_bin = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyRunnerBin)
        ));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = OrchestratorConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn yaml_overrides_defaults() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runner_bin: custom-worker\nworkflow_name: fix-issue").unwrap();
        file.flush().unwrap();
        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.runner_bin, "custom-worker");
        assert_eq!(config.workflow_name, "fix-issue");
        assert_eq!(config.state_root, OrchestratorConfig::default().state_root);
    }
}
