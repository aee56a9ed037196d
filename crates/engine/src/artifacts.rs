//! Per-execution artifacts and consolidated phase results
//!
//! Layout under the scenario root:
//!
//! ```text
//! coverage/artifacts/<workflow>/timeline.json
//! coverage/artifacts/<workflow>/summary.json
//! coverage/artifacts/<workflow>/screenshots/step-NNN-<node>.png
//! coverage/artifacts/<workflow>/README.md
//! coverage/phase-results/playbooks.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use basrun_common::RunnerSettings;

use crate::client::WorkerApi;
use crate::error::EngineResult;
use crate::runner::PhaseResults;
use crate::timeline::{Timeline, TimelineSummary};

pub const TIMELINE_FILE: &str = "timeline.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const README_FILE: &str = "README.md";
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const PHASE_RESULTS_FILE: &str = "playbooks.json";

/// Screenshot bytes for one timeline step
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedScreenshot {
    pub step_index: u32,
    pub node_id: String,
    pub data: Vec<u8>,
}

impl CollectedScreenshot {
    pub fn file_name(&self) -> String {
        let node: String = self
            .node_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("step-{:03}-{}.png", self.step_index, node)
    }
}

/// Everything persisted for one dispatched workflow
#[derive(Debug, Clone)]
pub struct ExecutionArtifacts {
    pub workflow: String,
    pub execution_id: String,
    pub status: String,
    pub timeline: Vec<u8>,
    pub summary: TimelineSummary,
    pub screenshots: Vec<CollectedScreenshot>,
}

#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Persist one execution; returns the timeline path
    async fn write_execution(&self, artifacts: &ExecutionArtifacts) -> EngineResult<PathBuf>;

    /// Persist consolidated results; returns the file path
    async fn write_phase_results(&self, results: &PhaseResults) -> EngineResult<PathBuf>;
}

/// Filesystem writer; writes are serialized
pub struct FsArtifactWriter {
    artifacts_dir: PathBuf,
    phase_results_dir: PathBuf,
    lock: Mutex<()>,
}

impl FsArtifactWriter {
    pub fn new(artifacts_dir: impl Into<PathBuf>, phase_results_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            phase_results_dir: phase_results_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn for_scenario(root: &Path, settings: &RunnerSettings) -> Self {
        Self::new(
            root.join(&settings.artifacts_dir),
            root.join(&settings.phase_results_dir),
        )
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write_execution(&self, artifacts: &ExecutionArtifacts) -> EngineResult<PathBuf> {
        let _guard = self.lock.lock().await;

        let dir = self.artifacts_dir.join(&artifacts.workflow);
        tokio::fs::create_dir_all(&dir).await?;

        let timeline_path = dir.join(TIMELINE_FILE);
        tokio::fs::write(&timeline_path, &artifacts.timeline).await?;

        let summary = serde_json::to_vec_pretty(&artifacts.summary)?;
        tokio::fs::write(dir.join(SUMMARY_FILE), summary).await?;

        let mut names = Vec::with_capacity(artifacts.screenshots.len());
        if !artifacts.screenshots.is_empty() {
            let shots_dir = dir.join(SCREENSHOTS_DIR);
            tokio::fs::create_dir_all(&shots_dir).await?;
            for shot in &artifacts.screenshots {
                let name = shot.file_name();
                tokio::fs::write(shots_dir.join(&name), &shot.data).await?;
                names.push(name);
            }
        }

        tokio::fs::write(dir.join(README_FILE), render_readme(artifacts, &names)).await?;

        info!(
            execution_id = %artifacts.execution_id,
            "Wrote artifacts for {} to {}",
            artifacts.workflow,
            dir.display()
        );
        Ok(timeline_path)
    }

    async fn write_phase_results(&self, results: &PhaseResults) -> EngineResult<PathBuf> {
        let _guard = self.lock.lock().await;

        tokio::fs::create_dir_all(&self.phase_results_dir).await?;
        let path = self.phase_results_dir.join(PHASE_RESULTS_FILE);
        tokio::fs::write(&path, serde_json::to_vec_pretty(results)?).await?;
        debug!("Wrote phase results to {}", path.display());
        Ok(path)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn render_readme(artifacts: &ExecutionArtifacts, screenshots: &[String]) -> String {
    let summary = &artifacts.summary;
    let mut out = format!(
        "# Playbook artifacts: {}\n\n\
         - Status: {}\n\
         - Execution: {}\n\
         - Timeline SHA-256: {}\n\
         - Steps: {} total, {} passed, {} failed\n\
         - Assertions: {} of {} passed\n",
        artifacts.workflow,
        artifacts.status,
        artifacts.execution_id,
        sha256_hex(&artifacts.timeline),
        summary.total_steps,
        summary.passed_steps,
        summary.failed_steps,
        summary.assertions.passed,
        summary.assertions.total,
    );

    if let Some(failure) = &summary.first_failure {
        out.push_str(&format!(
            "- First failure: step {} ({}, {}): {}\n",
            failure.step_index, failure.node_id, failure.step_type, failure.message
        ));
    }

    if !screenshots.is_empty() {
        out.push_str("\n## Screenshots\n\n");
        for name in screenshots {
            out.push_str(&format!("- {}/{}\n", SCREENSHOTS_DIR, name));
        }
    }
    out
}

/// Fetch every screenshot the timeline references.
///
/// Downloads run concurrently; results keep step order. Failures come back as
/// warnings and never abort the batch.
pub async fn collect_screenshots(
    api: &dyn WorkerApi,
    timeline: &Timeline,
) -> (Vec<CollectedScreenshot>, Vec<String>) {
    let fetches = timeline
        .frames
        .iter()
        .filter_map(|frame| frame.screenshot.as_ref().map(|shot| (frame, shot)))
        .map(|(frame, shot)| async move {
            let data = if let Some(encoded) = shot.base64.as_deref().filter(|s| !s.is_empty()) {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| format!("step {} screenshot: invalid base64: {}", frame.step_index, e))?
            } else if let Some(url) = shot.url.as_deref().filter(|s| !s.is_empty()) {
                api.download(url)
                    .await
                    .map_err(|e| format!("step {} screenshot {}: {}", frame.step_index, url, e))?
            } else {
                return Err(format!("step {} screenshot has neither url nor data", frame.step_index));
            };
            Ok::<_, String>(CollectedScreenshot {
                step_index: frame.step_index,
                node_id: frame.node_id.clone(),
                data,
            })
        });

    let mut collected = Vec::new();
    let mut warnings = Vec::new();
    for result in join_all(fetches).await {
        match result {
            Ok(shot) => collected.push(shot),
            Err(message) => {
                warn!("{}", message);
                warnings.push(message);
            }
        }
    }
    (collected, warnings)
}
