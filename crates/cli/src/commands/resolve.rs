//! `basrun resolve`

use anyhow::Result;
use clap::Args;

use basrun_engine::resolver::{apply_base_url, strip_resolver_fields};
use basrun_engine::{FsPlaybookResolver, RegistryEntry, WorkflowResolver};

use super::ScenarioArgs;
use crate::output::{print_value, OutputFormat};

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub scenario: ScenarioArgs,

    /// Workflow file, relative to the scenario root
    pub file: String,

    /// UI base URL substituted for ${BASE_URL}
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,
}

pub async fn execute(args: ResolveArgs, format: OutputFormat) -> Result<bool> {
    let config = args.scenario.load_config()?;
    let resolver = FsPlaybookResolver::new(args.scenario.scenario.clone(), &config.runner);

    let entry = RegistryEntry {
        file: args.file,
        requirements: Vec::new(),
        description: String::new(),
    };
    let mut workflow = resolver.resolve_entry(&entry)?;
    apply_base_url(&mut workflow, args.base_url.as_deref())?;
    strip_resolver_fields(&mut workflow);

    print_value(&workflow, format)?;
    Ok(true)
}
