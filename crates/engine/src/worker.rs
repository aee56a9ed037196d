//! Locating, starting and health-gating the browser worker

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use basrun_common::WorkerSettings;

use crate::client::{WorkerApi, WorkerHealth};
use crate::error::{EngineError, EngineResult};

/// Finds the worker's base URL
#[async_trait]
pub trait WorkerLocator: Send + Sync {
    async fn locate(&self) -> EngineResult<String>;
}

/// Brings up a worker when none can be located
#[async_trait]
pub trait WorkerStarter: Send + Sync {
    async fn start(&self) -> EngineResult<()>;
}

/// Reads the worker location from settings
#[derive(Debug, Clone)]
pub struct ConfigWorkerLocator {
    settings: WorkerSettings,
}

impl ConfigWorkerLocator {
    pub fn new(settings: WorkerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl WorkerLocator for ConfigWorkerLocator {
    async fn locate(&self) -> EngineResult<String> {
        if let Some(url) = self.settings.configured_url() {
            return Ok(url);
        }
        if let Some(url) = self.settings.fallback_url() {
            info!("No worker configured; falling back to {}", url);
            return Ok(url);
        }
        Err(EngineError::WorkerUnavailable(format!(
            "no {} worker configured (set WORKER_URL or WORKER_PORT)",
            self.settings.class()
        )))
    }
}

/// Fixed URL, for callers that already know where the worker is
#[derive(Debug, Clone)]
pub struct StaticWorkerLocator(pub String);

#[async_trait]
impl WorkerLocator for StaticWorkerLocator {
    async fn locate(&self) -> EngineResult<String> {
        Ok(self.0.clone())
    }
}

/// Spawns a worker process and keeps it alive until dropped
pub struct ProcessWorkerStarter {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    child: Mutex<Option<Child>>,
}

impl ProcessWorkerStarter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,
            child: Mutex::new(None),
        }
    }

    /// Run a shell command line through `sh -c`
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(|c| c.id())
    }

    /// Stop the worker: SIGTERM, a short grace period, then kill
    pub async fn stop(&self) {
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        info!("Stopping worker (pid: {:?})", child.id());

        if terminate(&child) && timeout(STOP_GRACE, child.wait()).await.is_ok() {
            return;
        }
        if let Err(e) = child.kill().await {
            warn!("Failed to kill worker: {}", e);
        }
    }
}

const STOP_GRACE: Duration = Duration::from_millis(500);

/// Send SIGTERM; false when the signal could not be delivered
fn terminate(child: &Child) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(id) = child.id() {
            return kill(Pid::from_raw(id as i32), Signal::SIGTERM).is_ok();
        }
    }
    let _ = child;
    false
}

#[async_trait]
impl WorkerStarter for ProcessWorkerStarter {
    async fn start(&self) -> EngineResult<()> {
        let mut guard = self.child.lock();
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => warn!("Previous worker exited with {}", status),
                Err(e) => warn!("Could not poll previous worker: {}", e),
            }
        }

        info!("Starting worker: {} {}", self.program, self.args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| EngineError::WorkerStart(format!("failed to spawn {}: {}", self.program, e)))?;
        *guard = Some(child);
        Ok(())
    }
}

impl Drop for ProcessWorkerStarter {
    fn drop(&mut self) {
        // SIGTERM first; kill_on_drop follows with SIGKILL as the child drops
        if let Some(child) = self.child.get_mut().take() {
            terminate(&child);
        }
    }
}

/// Poll `/health` until the worker reports ok, the deadline passes, or the run is cancelled
pub async fn wait_for_healthy(
    api: &dyn WorkerApi,
    timeout: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> EngineResult<WorkerHealth> {
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last_problem = String::from("no response");

    loop {
        attempts += 1;

        let probe = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            probe = api.health() => probe,
        };

        match probe {
            Ok(health) if health.is_healthy() => {
                info!("Worker healthy at {} after {} attempt(s)", api.base_url(), attempts);
                return Ok(health);
            }
            Ok(health) => {
                last_problem = health.problem().unwrap_or_default();
                warn!("Worker health check: {}", last_problem);
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for worker at {}...", api.base_url());
                }
                last_problem = e.to_string();
            }
        }

        if start.elapsed() >= timeout {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = sleep(poll) => {}
        }
    }

    Err(EngineError::WorkerUnavailable(format!(
        "worker at {} not healthy after {} attempt(s): {}",
        api.base_url(),
        attempts,
        last_problem
    )))
}
