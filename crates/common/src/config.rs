//! Engine configuration
//!
//! Defaults are suitable for a local worker. A TOML file may override any
//! field, and the environment variables understood by the engine are applied
//! on top of that.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Lower bound for `MAX_SESSIONS`
pub const MIN_SESSIONS: u32 = 1;
/// Upper bound for `MAX_SESSIONS`
pub const MAX_SESSIONS: u32 = 100;
/// `MAX_SESSIONS` when unset or unparsable
pub const DEFAULT_MAX_SESSIONS: u32 = 10;

/// Lower bound for `SECURITY_MAX_PROMPT_LENGTH`
pub const MIN_PROMPT_LENGTH: usize = 1_000;
/// Upper bound for `SECURITY_MAX_PROMPT_LENGTH`
pub const MAX_PROMPT_LENGTH: usize = 1_000_000;
/// Prompt length limit when unset
pub const DEFAULT_PROMPT_LENGTH: usize = 100_000;

/// Class of browser worker the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerClass {
    /// Full-featured worker located by `WORKER_URL` / `WORKER_PORT`
    #[default]
    Playwright,
    /// Alternate driver located by `DRIVER_URL`
    Browserless,
}

impl WorkerClass {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "playwright" => Some(WorkerClass::Playwright),
            "browserless" | "driver" => Some(WorkerClass::Browserless),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerClass::Playwright => write!(f, "playwright"),
            WorkerClass::Browserless => write!(f, "browserless"),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker location and transport settings
    pub worker: WorkerSettings,

    /// Playbook runner settings
    pub runner: RunnerSettings,

    /// Security policy settings
    pub security: SecuritySettings,
}

/// Worker location and transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker class selected by `ENGINE`
    pub engine: Option<WorkerClass>,

    /// Worker class forced by `ENGINE_OVERRIDE`
    pub engine_override: Option<WorkerClass>,

    /// Full worker URL (`WORKER_URL`)
    pub url: Option<String>,

    /// Worker port on localhost (`WORKER_PORT`)
    pub port: Option<u16>,

    /// Alternate driver URL (`DRIVER_URL`)
    pub driver_url: Option<String>,

    /// Maximum concurrent sessions (`MAX_SESSIONS`)
    pub max_sessions: u32,

    /// Fall back to a localhost port when nothing is configured
    pub allow_fallback: bool,

    /// Port used when falling back
    pub fallback_port: u16,

    /// Per-request timeout
    pub rpc_timeout_ms: u64,

    /// How long to wait for the worker to report healthy
    pub health_timeout_ms: u64,

    /// Delay between health probes
    pub health_poll_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            engine: None,
            engine_override: None,
            url: None,
            port: None,
            driver_url: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            allow_fallback: false,
            fallback_port: 4110,
            rpc_timeout_ms: 10_000,
            health_timeout_ms: 30_000,
            health_poll_ms: 250,
        }
    }
}

impl WorkerSettings {
    /// Effective worker class: override, then explicit engine, then driver URL presence
    pub fn class(&self) -> WorkerClass {
        if let Some(class) = self.engine_override {
            return class;
        }
        if let Some(class) = self.engine {
            return class;
        }
        if self.driver_url.is_some() && self.url.is_none() && self.port.is_none() {
            return WorkerClass::Browserless;
        }
        WorkerClass::Playwright
    }

    /// Configured URL for the effective worker class, if any
    pub fn configured_url(&self) -> Option<String> {
        match self.class() {
            WorkerClass::Playwright => self
                .url
                .clone()
                .or_else(|| self.port.map(|port| format!("http://127.0.0.1:{}", port))),
            WorkerClass::Browserless => self.driver_url.clone(),
        }
    }

    /// Fallback URL, when fallback is enabled
    pub fn fallback_url(&self) -> Option<String> {
        self.allow_fallback
            .then(|| format!("http://127.0.0.1:{}", self.fallback_port))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms)
    }
}

/// Playbook runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Directory holding `registry.json`, relative to the scenario root
    pub registry_dir: PathBuf,

    /// Per-workflow artifact directory, relative to the scenario root
    pub artifacts_dir: PathBuf,

    /// Consolidated phase results directory, relative to the scenario root
    pub phase_results_dir: PathBuf,

    /// Selector manifest, relative to the scenario root
    pub selector_manifest: PathBuf,

    /// Fixture directory, relative to the scenario root
    pub fixtures_dir: PathBuf,

    /// Upper bound on waiting for one workflow to finish
    pub completion_timeout_ms: u64,

    /// Delay between execution status polls
    pub status_poll_ms: u64,

    /// Return immediately without running (`SKIP_PLAYBOOKS=1`)
    pub skip_playbooks: bool,

    /// Ask the worker to validate each resolved graph before dispatch
    pub validate_before_dispatch: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from("bas"),
            artifacts_dir: PathBuf::from("coverage/artifacts"),
            phase_results_dir: PathBuf::from("coverage/phase-results"),
            selector_manifest: PathBuf::from("ui/src/constants/selectors.manifest.json"),
            fixtures_dir: PathBuf::from("bas/actions"),
            completion_timeout_ms: 300_000,
            status_poll_ms: 500,
            skip_playbooks: false,
            validate_before_dispatch: true,
        }
    }
}

impl RunnerSettings {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }
}

/// Security policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Commands added to the default bash allowlist
    pub extra_allowed_bash_commands: Vec<String>,

    /// Enable the stricter prompt pattern set
    pub prompt_validation_strict: bool,

    /// Maximum prompt length in characters
    pub max_prompt_length: usize,

    /// Allow glob patterns for every allowed command, not only glob-safe ones
    pub allow_glob_patterns: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            extra_allowed_bash_commands: Vec::new(),
            prompt_validation_strict: false,
            max_prompt_length: DEFAULT_PROMPT_LENGTH,
            allow_glob_patterns: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get("WORKER_URL") {
            self.worker.url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(port) = get("WORKER_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.worker.port = Some(port);
        }
        if let Some(url) = get("DRIVER_URL") {
            self.worker.driver_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(raw) = get("MAX_SESSIONS") {
            self.worker.max_sessions = parse_max_sessions(&raw);
        }
        if let Some(engine) = get("ENGINE").and_then(|v| WorkerClass::parse(&v)) {
            self.worker.engine = Some(engine);
        }
        if let Some(engine) = get("ENGINE_OVERRIDE").and_then(|v| WorkerClass::parse(&v)) {
            self.worker.engine_override = Some(engine);
        }
        if let Some(skip) = get("SKIP_PLAYBOOKS") {
            self.runner.skip_playbooks = skip == "1";
        }

        if let Some(extra) = get("SECURITY_EXTRA_ALLOWED_BASH_COMMANDS") {
            self.security.extra_allowed_bash_commands = parse_command_list(&extra);
        }
        if let Some(strict) = get("SECURITY_PROMPT_VALIDATION_STRICT") {
            self.security.prompt_validation_strict = parse_bool(&strict);
        }
        if let Some(raw) = get("SECURITY_MAX_PROMPT_LENGTH") {
            if let Ok(len) = raw.parse::<usize>() {
                self.security.max_prompt_length = len.clamp(MIN_PROMPT_LENGTH, MAX_PROMPT_LENGTH);
            }
        }
        if let Some(glob) = get("SECURITY_ALLOW_GLOB_PATTERNS") {
            self.security.allow_glob_patterns = parse_bool(&glob);
        }
    }

    /// Load from file (if given) and then apply the process environment
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }
}

/// Parse `MAX_SESSIONS`, clamping to [1, 100] and defaulting to 10
pub fn parse_max_sessions(raw: &str) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(n) => n.clamp(MIN_SESSIONS as i64, MAX_SESSIONS as i64) as u32,
        Err(_) => DEFAULT_MAX_SESSIONS,
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_command_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.worker.max_sessions, 10);
        assert_eq!(config.worker.class(), WorkerClass::Playwright);
        assert!(config.worker.configured_url().is_none());
        assert_eq!(config.runner.registry_dir, PathBuf::from("bas"));
        assert!(!config.runner.skip_playbooks);
    }

    #[test]
    fn test_max_sessions_clamped() {
        assert_eq!(parse_max_sessions("0"), 1);
        assert_eq!(parse_max_sessions("-5"), 1);
        assert_eq!(parse_max_sessions("250"), 100);
        assert_eq!(parse_max_sessions("42"), 42);
        assert_eq!(parse_max_sessions("lots"), 10);
    }

    #[test]
    fn test_worker_url_wins_over_port() {
        let mut config = EngineConfig::default();
        config.apply_env_from(lookup(&[
            ("WORKER_URL", "http://worker:9000/"),
            ("WORKER_PORT", "4100"),
        ]));
        assert_eq!(config.worker.configured_url().as_deref(), Some("http://worker:9000"));
    }

    #[test]
    fn test_worker_port_becomes_localhost_url() {
        let mut config = EngineConfig::default();
        config.apply_env_from(lookup(&[("WORKER_PORT", "4100")]));
        assert_eq!(
            config.worker.configured_url().as_deref(),
            Some("http://127.0.0.1:4100")
        );
    }

    #[test]
    fn test_driver_url_selects_alternate_class() {
        let mut config = EngineConfig::default();
        config.apply_env_from(lookup(&[("DRIVER_URL", "http://driver:3000")]));
        assert_eq!(config.worker.class(), WorkerClass::Browserless);
        assert_eq!(config.worker.configured_url().as_deref(), Some("http://driver:3000"));
    }

    #[test]
    fn test_engine_override_forces_class() {
        let mut config = EngineConfig::default();
        config.apply_env_from(lookup(&[
            ("ENGINE", "browserless"),
            ("ENGINE_OVERRIDE", "playwright"),
            ("WORKER_PORT", "4100"),
        ]));
        assert_eq!(config.worker.class(), WorkerClass::Playwright);
    }

    #[test]
    fn test_security_env() {
        let mut config = EngineConfig::default();
        config.apply_env_from(lookup(&[
            ("SECURITY_EXTRA_ALLOWED_BASH_COMMANDS", "docker, kubectl,,"),
            ("SECURITY_PROMPT_VALIDATION_STRICT", "true"),
            ("SECURITY_MAX_PROMPT_LENGTH", "10"),
            ("SECURITY_ALLOW_GLOB_PATTERNS", "1"),
        ]));
        assert_eq!(
            config.security.extra_allowed_bash_commands,
            vec!["docker".to_string(), "kubectl".to_string()]
        );
        assert!(config.security.prompt_validation_strict);
        assert_eq!(config.security.max_prompt_length, MIN_PROMPT_LENGTH);
        assert!(config.security.allow_glob_patterns);
    }

    #[test]
    fn test_skip_flag_only_for_one() {
        let mut config = EngineConfig::default();
        config.apply_env_from(lookup(&[("SKIP_PLAYBOOKS", "true")]));
        assert!(!config.runner.skip_playbooks);
        config.apply_env_from(lookup(&[("SKIP_PLAYBOOKS", "1")]));
        assert!(config.runner.skip_playbooks);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basrun.toml");

        let mut config = EngineConfig::default();
        config.worker.url = Some("http://worker:9000".to_string());
        config.runner.status_poll_ms = 50;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.worker.url.as_deref(), Some("http://worker:9000"));
        assert_eq!(loaded.runner.status_poll_ms, 50);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/basrun.toml")).unwrap();
        assert_eq!(config.worker.max_sessions, DEFAULT_MAX_SESSIONS);
    }
}
