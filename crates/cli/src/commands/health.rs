//! `basrun health`

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use basrun_engine::client::WorkerApi;
use basrun_engine::{ConfigWorkerLocator, EngineCapabilities, WorkerClient, WorkerHealth, WorkerLocator};

use super::ScenarioArgs;
use crate::output::{print_error, print_success, print_value, OutputFormat};

#[derive(Args, Debug)]
pub struct HealthArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,

    /// Worker URL, overriding WORKER_URL and the config file
    #[arg(long)]
    pub worker_url: Option<String>,
}

#[derive(Serialize)]
struct HealthReport {
    url: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
    health: Option<WorkerHealth>,
    capabilities: EngineCapabilities,
}

pub async fn execute(args: HealthArgs, format: OutputFormat) -> Result<bool> {
    let config = args.scenario.load_config()?;
    let url = match args.worker_url {
        Some(url) => url,
        None => ConfigWorkerLocator::new(config.worker.clone()).locate().await?,
    };
    let capabilities = EngineCapabilities::for_class(config.worker.class(), config.worker.max_sessions);

    let client = WorkerClient::new(url.clone(), config.worker.rpc_timeout())?;
    let (health, problem) = match client.health().await {
        Ok(health) => {
            let problem = health.problem();
            (Some(health), problem)
        }
        Err(e) => (None, Some(e.to_string())),
    };
    let report = HealthReport {
        url,
        healthy: problem.is_none(),
        problem,
        health,
        capabilities,
    };

    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_value(&report, format)?,
        OutputFormat::Table | OutputFormat::Plain => match &report.problem {
            None => {
                let version = report
                    .health
                    .as_ref()
                    .and_then(|h| h.version.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                print_success(&format!(
                    "Worker at {} is healthy ({} worker, version {})",
                    report.url, report.capabilities.engine_name, version
                ));
            }
            Some(problem) => print_error(&format!("Worker at {} is not healthy: {}", report.url, problem)),
        },
    }
    Ok(report.healthy)
}
