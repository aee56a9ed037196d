//! Playbook runner: registry execution with health gating, seeding and
//! artifact collection

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use basrun_common::{EngineConfig, FailureClass, Observation};

use crate::artifacts::{collect_screenshots, ArtifactWriter, ExecutionArtifacts, FsArtifactWriter};
use crate::capabilities::{CapabilityRequirement, EngineCapabilities};
use crate::client::{ExecutionState, ExecutionStatus, WorkerApi, WorkerClient};
use crate::error::{EngineError, EngineResult};
use crate::resolver::{apply_base_url, strip_resolver_fields, FsPlaybookResolver, WorkflowResolver};
use crate::seeds::{ScriptSeedManager, SeedManager};
use crate::timeline::{Timeline, TimelineSummary};
use crate::worker::{wait_for_healthy, ConfigWorkerLocator, WorkerLocator, WorkerStarter};
use crate::workflow::RegistryEntry;

pub const NO_WORKFLOWS: &str = "no workflows registered";

pub const REMEDIATION_REGISTRY: &str = "regenerate registry";
pub const REMEDIATION_WORKER: &str = "start the worker scenario";
pub const REMEDIATION_SEEDS: &str = "fix the seed scripts under bas/seeds";
pub const REMEDIATION_WORKFLOW: &str = "fix the workflow definition or the selector manifest";
pub const REMEDIATION_SYSTEM: &str = "check that the coverage directory is writable and retry";

/// Supplies the UI base URL substituted for `${BASE_URL}`
#[async_trait]
pub trait BaseUrlResolver: Send + Sync {
    async fn resolve(&self, scenario_root: &Path) -> EngineResult<Option<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticBaseUrl(pub Option<String>);

impl StaticBaseUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(Some(url.into()))
    }
}

#[async_trait]
impl BaseUrlResolver for StaticBaseUrl {
    async fn resolve(&self, _scenario_root: &Path) -> EngineResult<Option<String>> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of one registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookResult {
    pub file: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub status: PlaybookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<TimelineSummary>,
    pub duration_ms: u64,
}

impl PlaybookResult {
    fn for_entry(entry: &RegistryEntry) -> Self {
        Self {
            file: entry.file.clone(),
            name: entry.name(),
            description: entry.description.clone(),
            requirements: entry.requirements.clone(),
            status: PlaybookStatus::Failed,
            execution_id: None,
            error: None,
            failure_class: None,
            artifact_path: None,
            summary: None,
            duration_ms: 0,
        }
    }
}

/// Consolidated output written to `coverage/phase-results/playbooks.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResults {
    pub phase: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<PlaybookResult>,
    pub observations: Vec<Observation>,
}

/// Outcome of [`PlaybookRunner::run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub observations: Vec<Observation>,
    pub results: Vec<PlaybookResult>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_results_path: Option<PathBuf>,
}

impl RunResult {
    /// The failing playbook, if the run stopped on one
    pub fn failed_result(&self) -> Option<&PlaybookResult> {
        self.results.iter().find(|r| r.status == PlaybookStatus::Failed)
    }

    pub fn count(&self, status: PlaybookStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

struct Failure {
    class: FailureClass,
    remediation: String,
    error: String,
}

impl Failure {
    fn from_error(error: &EngineError, remediation: &str) -> Self {
        let class = error.failure_class();
        let remediation = match class {
            FailureClass::System => REMEDIATION_SYSTEM,
            FailureClass::MissingDependency => REMEDIATION_WORKER,
            _ => remediation,
        };
        Self {
            class,
            remediation: remediation.to_string(),
            error: error.to_string(),
        }
    }
}

/// Accumulated state of one run
struct Progress {
    started: Instant,
    observations: Vec<Observation>,
    results: Vec<PlaybookResult>,
    failure: Option<Failure>,
}

impl Progress {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            observations: Vec::new(),
            results: Vec::new(),
            failure: None,
        }
    }

    fn observe(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    fn fail(&mut self, failure: Failure) {
        error!("Run failed ({}): {}", failure.class, failure.error);
        self.observe(Observation::error(failure.error.clone()));
        self.failure = Some(failure);
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn count(&self, status: PlaybookStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    fn phase_results(&self) -> PhaseResults {
        PhaseResults {
            phase: "playbooks".to_string(),
            success: self.failure.is_none(),
            failure_class: self.failure.as_ref().map(|f| f.class),
            generated_at: Utc::now(),
            total: self.results.len(),
            passed: self.count(PlaybookStatus::Passed),
            failed: self.count(PlaybookStatus::Failed),
            skipped: self.count(PlaybookStatus::Skipped),
            duration_ms: self.elapsed_ms(),
            results: self.results.clone(),
            observations: self.observations.clone(),
        }
    }

    fn finish(self, phase_results_path: Option<PathBuf>) -> RunResult {
        let duration_ms = self.elapsed_ms();
        let (failure_class, remediation, error) = match self.failure {
            Some(f) => (Some(f.class), Some(f.remediation), Some(f.error)),
            None => (None, None, None),
        };
        RunResult {
            success: failure_class.is_none(),
            failure_class,
            remediation,
            error,
            observations: self.observations,
            results: self.results,
            duration_ms,
            phase_results_path,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct PlaybookRunnerBuilder {
    root: PathBuf,
    config: EngineConfig,
    client: Option<Arc<dyn WorkerApi>>,
    locator: Option<Arc<dyn WorkerLocator>>,
    starter: Option<Arc<dyn WorkerStarter>>,
    seeds: Option<Arc<dyn SeedManager>>,
    base_url: Option<Arc<dyn BaseUrlResolver>>,
    writer: Option<Arc<dyn ArtifactWriter>>,
    resolver: Option<Arc<dyn WorkflowResolver>>,
}

impl PlaybookRunnerBuilder {
    /// Use an already constructed worker client; location and start are skipped
    pub fn with_client(mut self, client: Arc<dyn WorkerApi>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn WorkerLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_starter(mut self, starter: Arc<dyn WorkerStarter>) -> Self {
        self.starter = Some(starter);
        self
    }

    pub fn with_seed_manager(mut self, seeds: Arc<dyn SeedManager>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn with_base_url_resolver(mut self, resolver: Arc<dyn BaseUrlResolver>) -> Self {
        self.base_url = Some(resolver);
        self
    }

    /// Shorthand for a static base URL
    pub fn with_base_url(self, url: impl Into<String>) -> Self {
        self.with_base_url_resolver(Arc::new(StaticBaseUrl::new(url)))
    }

    pub fn with_artifact_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn WorkflowResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> PlaybookRunner {
        let root = self.root;
        let config = self.config;

        PlaybookRunner {
            locator: self
                .locator
                .unwrap_or_else(|| Arc::new(ConfigWorkerLocator::new(config.worker.clone()))),
            seeds: self.seeds.unwrap_or_else(|| Arc::new(ScriptSeedManager::default())),
            base_url: self.base_url.unwrap_or_else(|| Arc::new(StaticBaseUrl::default())),
            writer: self
                .writer
                .unwrap_or_else(|| Arc::new(FsArtifactWriter::for_scenario(&root, &config.runner))),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(FsPlaybookResolver::new(root.clone(), &config.runner))),
            client: self.client,
            starter: self.starter,
            root,
            config,
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

pub struct PlaybookRunner {
    root: PathBuf,
    config: EngineConfig,
    client: Option<Arc<dyn WorkerApi>>,
    locator: Arc<dyn WorkerLocator>,
    starter: Option<Arc<dyn WorkerStarter>>,
    seeds: Arc<dyn SeedManager>,
    base_url: Arc<dyn BaseUrlResolver>,
    writer: Arc<dyn ArtifactWriter>,
    resolver: Arc<dyn WorkflowResolver>,
}

impl PlaybookRunner {
    pub fn builder(scenario_root: impl Into<PathBuf>, config: EngineConfig) -> PlaybookRunnerBuilder {
        PlaybookRunnerBuilder {
            root: scenario_root.into(),
            config,
            client: None,
            locator: None,
            starter: None,
            seeds: None,
            base_url: None,
            writer: None,
            resolver: None,
        }
    }

    pub fn scenario_root(&self) -> &Path {
        &self.root
    }

    /// Execute every registry entry in order, stopping at the first failure
    pub async fn run(&self, cancel: &CancellationToken) -> RunResult {
        let mut progress = Progress::new();

        if self.config.runner.skip_playbooks {
            info!("SKIP_PLAYBOOKS set; not running playbooks");
            progress.observe(Observation::skip("playbooks skipped (SKIP_PLAYBOOKS=1)"));
            return progress.finish(None);
        }
        if !self.root.join("ui").is_dir() {
            debug!("Scenario {} has no ui/ directory", self.root.display());
        }

        let registry = match self.resolver.load_registry() {
            Ok(registry) => registry,
            Err(e) => {
                let e = EngineError::from(e);
                progress.fail(Failure::from_error(&e, REMEDIATION_REGISTRY));
                return progress.finish(None);
            }
        };
        if registry.is_empty() {
            info!("Registry is empty");
            progress.observe(Observation::info(NO_WORKFLOWS));
            return progress.finish(None);
        }

        let api = match self.ensure_worker(cancel).await {
            Ok(api) => api,
            Err(e) => {
                progress.fail(Failure::from_error(&e, REMEDIATION_WORKER));
                return progress.finish(None);
            }
        };
        let capabilities =
            EngineCapabilities::for_class(self.config.worker.class(), self.config.worker.max_sessions);

        let cleanup = match self.seeds.apply(&self.root, cancel).await {
            Ok(cleanup) => cleanup,
            Err(e) => {
                progress.fail(Failure::from_error(&e, REMEDIATION_SEEDS));
                return self.persist(progress).await;
            }
        };

        match self.base_url.resolve(&self.root).await {
            Ok(base_url) => {
                if let Some(url) = &base_url {
                    debug!("UI base URL: {}", url);
                }
                for entry in &registry.playbooks {
                    if cancel.is_cancelled() {
                        progress.fail(Failure::from_error(&EngineError::Cancelled, REMEDIATION_SYSTEM));
                        break;
                    }
                    self.run_entry(api.as_ref(), &capabilities, entry, base_url.as_deref(), cancel, &mut progress)
                        .await;
                    if progress.failure.is_some() {
                        break;
                    }
                }
            }
            Err(e) => progress.fail(Failure::from_error(&e, REMEDIATION_WORKFLOW)),
        }

        if let Err(e) = cleanup.run().await {
            progress.observe(Observation::warning(format!("seed cleanup failed: {}", e)));
        }

        let passed = progress.count(PlaybookStatus::Passed);
        let failed = progress.count(PlaybookStatus::Failed);
        let skipped = progress.count(PlaybookStatus::Skipped);
        let summary = format!(
            "{} executed, {} passed, {} failed, {} skipped in {} ms",
            passed + failed,
            passed,
            failed,
            skipped,
            progress.elapsed_ms()
        );
        info!("Playbooks: {}", summary);
        progress.observe(Observation::info(summary));

        self.persist(progress).await
    }

    async fn persist(&self, mut progress: Progress) -> RunResult {
        match self.writer.write_phase_results(&progress.phase_results()).await {
            Ok(path) => progress.finish(Some(path)),
            Err(e) => {
                let message = format!("failed to write phase results: {}", e);
                if progress.failure.is_none() {
                    progress.fail(Failure {
                        class: FailureClass::System,
                        remediation: REMEDIATION_SYSTEM.to_string(),
                        error: message,
                    });
                } else {
                    progress.observe(Observation::warning(message));
                }
                progress.finish(None)
            }
        }
    }

    /// Health-check an injected client, or locate (starting at most once) and wait
    async fn ensure_worker(&self, cancel: &CancellationToken) -> EngineResult<Arc<dyn WorkerApi>> {
        let timeout = self.config.worker.health_timeout();
        let poll = self.config.worker.health_poll_interval();

        if let Some(client) = &self.client {
            wait_for_healthy(client.as_ref(), timeout, poll, cancel).await?;
            return Ok(client.clone());
        }

        let mut started = false;
        let url = match self.locator.locate().await {
            Ok(url) => url,
            Err(e) => {
                let Some(starter) = &self.starter else {
                    return Err(e);
                };
                info!("Worker not located ({}); starting it", e);
                starter.start().await?;
                started = true;
                self.locator.locate().await?
            }
        };

        let client: Arc<dyn WorkerApi> = Arc::new(WorkerClient::new(url, self.config.worker.rpc_timeout())?);
        match wait_for_healthy(client.as_ref(), timeout, poll, cancel).await {
            Ok(_) => Ok(client),
            Err(e) if e.is_cancelled() || started => Err(e),
            Err(e) => {
                let Some(starter) = &self.starter else {
                    return Err(e);
                };
                info!("Worker unhealthy ({}); starting it", e);
                starter.start().await?;
                wait_for_healthy(client.as_ref(), timeout, poll, cancel).await?;
                Ok(client)
            }
        }
    }

    async fn run_entry(
        &self,
        api: &dyn WorkerApi,
        capabilities: &EngineCapabilities,
        entry: &RegistryEntry,
        base_url: Option<&str>,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) {
        let started = Instant::now();
        let mut result = PlaybookResult::for_entry(entry);
        info!(playbook = %entry.file, "Running playbook");

        let outcome = self
            .execute_entry(api, capabilities, entry, base_url, cancel, &mut result, progress)
            .await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                match result.status {
                    PlaybookStatus::Passed => progress.observe(Observation::success(format!(
                        "{} passed ({} ms)",
                        result.name, result.duration_ms
                    ))),
                    PlaybookStatus::Skipped => {}
                    PlaybookStatus::Failed => {}
                }
                progress.results.push(result);
            }
            Err(failure) => {
                result.status = PlaybookStatus::Failed;
                result.error = Some(failure.error.clone());
                result.failure_class = Some(failure.class);
                progress.results.push(result);
                progress.fail(failure);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_entry(
        &self,
        api: &dyn WorkerApi,
        capabilities: &EngineCapabilities,
        entry: &RegistryEntry,
        base_url: Option<&str>,
        cancel: &CancellationToken,
        result: &mut PlaybookResult,
        progress: &mut Progress,
    ) -> Result<(), Failure> {
        let workflow_error = |e: EngineError| Failure::from_error(&e, REMEDIATION_WORKFLOW);

        let workflow = self
            .resolver
            .load_workflow(entry)
            .map_err(|e| workflow_error(e.into()))?;
        if let Some(fixture) = workflow.fixture_id() {
            info!(playbook = %entry.file, "Skipping fixture '{}'", fixture);
            progress.observe(Observation::skip(format!("{} is fixture '{}'", entry.file, fixture)));
            result.status = PlaybookStatus::Skipped;
            return Ok(());
        }

        let requirement = CapabilityRequirement::from_features(workflow.required_capabilities());
        let mut workflow = self
            .resolver
            .resolve(workflow, &entry.file)
            .map_err(|e| workflow_error(e.into()))?;
        apply_base_url(&mut workflow, base_url).map_err(|e| workflow_error(e.into()))?;
        strip_resolver_fields(&mut workflow);

        let gaps = requirement.gaps(capabilities);
        if !gaps.is_empty() {
            return Err(Failure::from_error(&EngineError::Capability(gaps), REMEDIATION_WORKER));
        }

        if self.config.runner.validate_before_dispatch {
            match api.validate_resolved(&workflow).await {
                Ok(report) => {
                    for warning in report.warning_messages() {
                        progress.observe(Observation::warning(format!("{}: {}", entry.name(), warning)));
                    }
                    if !report.valid {
                        let errors = report.error_messages().join("; ");
                        return Err(workflow_error(EngineError::Validation(errors)));
                    }
                }
                Err(e) => {
                    warn!(playbook = %entry.file, "Workflow validator unavailable: {}", e);
                    progress.observe(Observation::warning(format!("validator unavailable: {}", e)));
                }
            }
        }

        let name = entry.name();
        let execution_id = tokio::select! {
            _ = cancel.cancelled() => return Err(Failure::from_error(&EngineError::Cancelled, REMEDIATION_SYSTEM)),
            id = api.execute_adhoc(&workflow, Some(&name)) => id.map_err(|e| Failure::from_error(&e, REMEDIATION_WORKFLOW))?,
        };
        info!(playbook = %entry.file, execution_id = %execution_id, "Workflow queued");
        result.execution_id = Some(execution_id.clone());

        let status = self.await_completion(api, &execution_id, cancel).await;
        if let Err(e) = &status {
            if e.is_cancelled() {
                return Err(Failure::from_error(e, REMEDIATION_SYSTEM));
            }
        }

        let cancelled = || Failure::from_error(&EngineError::Cancelled, REMEDIATION_SYSTEM);

        let timeline_bytes = match tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            bytes = api.timeline(&execution_id) => bytes,
        } {
            Ok(bytes) => bytes,
            Err(e) => {
                progress.observe(Observation::warning(format!("timeline for {}: {}", execution_id, e)));
                Vec::new()
            }
        };
        let timeline = Timeline::parse(&timeline_bytes).unwrap_or_else(|e| {
            progress.observe(Observation::warning(e.to_string()));
            Timeline::default()
        });
        let summary = timeline.summarize();

        let (screenshots, warnings) = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            collected = collect_screenshots(api, &timeline) => collected,
        };
        for warning in warnings {
            progress.observe(Observation::warning(warning));
        }

        let status_label = match &status {
            Ok(s) => s.status.clone(),
            Err(EngineError::Timeout(_)) => "timeout".to_string(),
            Err(_) => "error".to_string(),
        };
        let artifacts = ExecutionArtifacts {
            workflow: entry.slug(),
            execution_id: execution_id.clone(),
            status: status_label,
            timeline: timeline_bytes,
            summary: summary.clone(),
            screenshots,
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            written = self.writer.write_execution(&artifacts) => written,
        };
        match written {
            Ok(path) => result.artifact_path = Some(path),
            Err(e) => progress.observe(Observation::warning(format!("artifacts for {}: {}", name, e))),
        }
        result.summary = Some(summary.clone());

        let status = status.map_err(|e| self.execution_failure(&e.to_string(), &*result))?;
        if let Some(message) = failure_message(&status, &summary) {
            return Err(self.execution_failure(&message, &*result));
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        result.status = PlaybookStatus::Passed;
        Ok(())
    }

    fn execution_failure(&self, message: &str, result: &PlaybookResult) -> Failure {
        let remediation = match &result.artifact_path {
            Some(path) => format!("inspect the timeline at {}", path.display()),
            None => "inspect the worker logs for the failing execution".to_string(),
        };
        Failure {
            class: FailureClass::Execution,
            remediation,
            error: format!("{} failed: {}", result.name, message),
        }
    }

    /// Poll execution status until terminal, the completion deadline, or cancellation
    async fn await_completion(
        &self,
        api: &dyn WorkerApi,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<ExecutionStatus> {
        let timeout = self.config.runner.completion_timeout();
        let poll = self.config.runner.status_poll_interval();
        let start = Instant::now();
        let mut last_progress = None;

        loop {
            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                status = api.execution_status(execution_id) => status?,
            };
            if status.state().is_terminal() {
                debug!(execution_id, "Execution finished: {}", status.status);
                return Ok(status);
            }
            if status.progress != last_progress {
                debug!(execution_id, progress = ?status.progress, "Execution {}", status.status);
                last_progress = status.progress;
            }

            if start.elapsed() >= timeout {
                return Err(EngineError::Timeout(format!(
                    "execution {} to finish within {} ms",
                    execution_id,
                    timeout.as_millis()
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = sleep(poll) => {}
            }
        }
    }
}

/// Why a finished execution counts as failed, if it does
fn failure_message(status: &ExecutionStatus, summary: &TimelineSummary) -> Option<String> {
    let first = summary
        .first_failure
        .as_ref()
        .map(|f| format!("step {} ({}) {}", f.step_index, f.node_id, f.message));

    match status.state() {
        ExecutionState::Completed if !summary.has_failures() => None,
        ExecutionState::Completed => first,
        state => Some(
            status
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .or(first)
                .unwrap_or_else(|| format!("execution ended as {:?}", state).to_lowercase()),
        ),
    }
}
