//! basrun CLI - Main Entry Point
//!
//! Runs scenario playbooks against a browser worker, resolves individual
//! workflows, and analyzes requirement validation quality.

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{analyze, check, health, resolve, run};

/// basrun - browser-automation playbook runner
#[derive(Parser)]
#[command(name = "basrun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every playbook in the scenario registry
    Run(run::RunArgs),

    /// Resolve one workflow file and print the result
    Resolve(resolve::ResolveArgs),

    /// Analyze requirement validation quality
    Analyze(analyze::AnalyzeArgs),

    /// Check worker health
    Health(health::HealthArgs),

    /// Check a bash command against the allowlist
    CheckCommand(check::CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ok = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await?,
        Commands::Resolve(args) => resolve::execute(args, cli.format).await?,
        Commands::Analyze(args) => analyze::execute(args, cli.format).await?,
        Commands::Health(args) => health::execute(args, cli.format).await?,
        Commands::CheckCommand(args) => check::execute(args, cli.format).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
