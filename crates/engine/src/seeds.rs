//! Scenario seed data

use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

pub const APPLY_SCRIPT: &str = "apply.sh";
pub const CLEANUP_SCRIPT: &str = "cleanup.sh";

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, EngineResult<()>> + Send>;

/// Deferred cleanup returned by [`SeedManager::apply`]
#[derive(Default)]
pub struct SeedCleanup {
    inner: Option<CleanupFn>,
}

impl SeedCleanup {
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        Self {
            inner: Some(Box::new(move || Box::pin(f()))),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    pub async fn run(self) -> EngineResult<()> {
        match self.inner {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SeedCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedCleanup").field("noop", &self.is_noop()).finish()
    }
}

#[async_trait]
pub trait SeedManager: Send + Sync {
    async fn apply(&self, scenario_root: &Path, cancel: &CancellationToken) -> EngineResult<SeedCleanup>;
}

/// Seeds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSeedManager;

#[async_trait]
impl SeedManager for NoopSeedManager {
    async fn apply(&self, _scenario_root: &Path, _cancel: &CancellationToken) -> EngineResult<SeedCleanup> {
        Ok(SeedCleanup::noop())
    }
}

/// Runs `bas/seeds/apply.sh`, and `cleanup.sh` on cleanup, with bash
#[derive(Debug, Clone)]
pub struct ScriptSeedManager {
    seeds_dir: PathBuf,
}

impl Default for ScriptSeedManager {
    fn default() -> Self {
        Self::new("bas/seeds")
    }
}

impl ScriptSeedManager {
    /// `seeds_dir` is relative to the scenario root
    pub fn new(seeds_dir: impl Into<PathBuf>) -> Self {
        Self {
            seeds_dir: seeds_dir.into(),
        }
    }
}

async fn run_script(root: &Path, script: &Path, cancel: &CancellationToken) -> EngineResult<()> {
    info!("Running seed script {}", script.display());
    let mut cmd = Command::new("bash");
    cmd.arg(script).current_dir(root).kill_on_drop(true);

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        output = cmd.output() => output.map_err(|e| EngineError::Seed(format!("{}: {}", script.display(), e)))?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::Seed(format!(
            "{} exited with {}: {}",
            script.display(),
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[async_trait]
impl SeedManager for ScriptSeedManager {
    async fn apply(&self, scenario_root: &Path, cancel: &CancellationToken) -> EngineResult<SeedCleanup> {
        let dir = scenario_root.join(&self.seeds_dir);
        let apply = dir.join(APPLY_SCRIPT);
        if apply.is_file() {
            run_script(scenario_root, &apply, cancel).await?;
        }

        let cleanup = dir.join(CLEANUP_SCRIPT);
        if !cleanup.is_file() {
            return Ok(SeedCleanup::noop());
        }

        let root = scenario_root.to_path_buf();
        Ok(SeedCleanup::new(move || async move {
            let result = run_script(&root, &cleanup, &CancellationToken::new()).await;
            if let Err(e) = &result {
                warn!("Seed cleanup failed: {}", e);
            }
            result
        }))
    }
}
