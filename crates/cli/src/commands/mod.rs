//! CLI commands

pub mod analyze;
pub mod check;
pub mod health;
pub mod resolve;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use basrun_common::{EngineConfig, DEFAULT_CONFIG_FILE};

/// Scenario selection shared by scenario-bound commands
#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    /// Scenario root directory
    #[arg(long, default_value = ".")]
    pub scenario: PathBuf,

    /// Config file (defaults to <scenario>/basrun.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ScenarioArgs {
    pub fn load_config(&self) -> Result<EngineConfig> {
        load_config(&self.scenario, self.config.as_deref())
    }
}

/// File config (if any) with environment overrides applied
pub fn load_config(scenario: &Path, config: Option<&Path>) -> Result<EngineConfig> {
    let path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| scenario.join(DEFAULT_CONFIG_FILE));
    EngineConfig::from_sources(Some(&path)).with_context(|| format!("loading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_to_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[runner]\nregistry_dir = \"suite\"\n",
        )
        .unwrap();

        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.runner.registry_dir, PathBuf::from("suite"));
    }

    #[test]
    fn test_explicit_config_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "[runner]\nregistry_dir = \"suite\"\n").unwrap();
        let other = dir.path().join("ci.toml");
        std::fs::write(&other, "[runner]\nregistry_dir = \"ci\"\n").unwrap();

        let config = load_config(dir.path(), Some(&other)).unwrap();
        assert_eq!(config.runner.registry_dir, PathBuf::from("ci"));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.runner.registry_dir, PathBuf::from("bas"));
    }

    #[test]
    fn test_malformed_config_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "[runner\n").unwrap();

        let err = load_config(dir.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains(DEFAULT_CONFIG_FILE));
    }
}
