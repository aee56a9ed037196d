//! `basrun run`

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use basrun_engine::{PlaybookResult, PlaybookRunner, PlaybookStatus, ProcessWorkerStarter};

use super::ScenarioArgs;
use crate::output::{print_error, print_list, print_observation, print_success, print_value, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,

    /// UI base URL substituted for ${BASE_URL}
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Worker URL, overriding WORKER_URL and the config file
    #[arg(long)]
    pub worker_url: Option<String>,

    /// Shell command that starts the worker when it is not reachable
    #[arg(long)]
    pub worker_start_cmd: Option<String>,
}

#[derive(Serialize)]
struct PlaybookRow<'a>(&'a PlaybookResult);

impl TableDisplay for PlaybookRow<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["Playbook", "Status", "Execution", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let r = self.0;
        let status = match r.status {
            PlaybookStatus::Passed => "passed",
            PlaybookStatus::Failed => "failed",
            PlaybookStatus::Skipped => "skipped",
        };
        let detail = r
            .error
            .clone()
            .or_else(|| r.artifact_path.as_ref().map(|p| p.display().to_string()))
            .unwrap_or_default();
        vec![
            r.file.clone(),
            status.to_string(),
            r.execution_id.clone().unwrap_or_else(|| "-".to_string()),
            format!("{} ms", r.duration_ms),
            detail,
        ]
    }
}

/// Returns whether the run succeeded
pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<bool> {
    let mut config = args.scenario.load_config()?;
    if let Some(url) = &args.worker_url {
        config.worker.url = Some(url.trim_end_matches('/').to_string());
    }

    let root = args.scenario.scenario.clone();
    let mut builder = PlaybookRunner::builder(root.clone(), config);
    if let Some(url) = &args.base_url {
        builder = builder.with_base_url(url.clone());
    }
    if let Some(cmd) = &args.worker_start_cmd {
        builder = builder.with_starter(Arc::new(ProcessWorkerStarter::shell(cmd.clone()).current_dir(root)));
    }
    let runner = builder.build();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            on_signal.cancel();
        }
    });

    let result = runner.run(&cancel).await;

    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_value(&result, format)?,
        OutputFormat::Table | OutputFormat::Plain => {
            for observation in &result.observations {
                print_observation(observation);
            }
            if !result.results.is_empty() {
                println!();
                let rows: Vec<_> = result.results.iter().map(PlaybookRow).collect();
                print_list(&rows, format)?;
            }
            if result.success {
                print_success(&format!("Playbooks passed in {} ms", result.duration_ms));
            } else {
                let class = result.failure_class.map(|c| c.to_string()).unwrap_or_default();
                print_error(&format!(
                    "Playbooks failed ({}): {}",
                    class,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
                if let Some(remediation) = &result.remediation {
                    println!("  remediation: {}", remediation);
                }
            }
        }
    }

    Ok(result.success)
}
