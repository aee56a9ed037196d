//! `basrun check-command`

use anyhow::Result;
use clap::Args;

use basrun_common::{EngineConfig, SecurityValidator};

use crate::output::{print_error, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Bash command line to check against the allowlist
    pub command: String,
}

pub async fn execute(args: CheckArgs, _format: OutputFormat) -> Result<bool> {
    let config = EngineConfig::from_sources(None)?;
    let validator = SecurityValidator::new(&config.security);

    match validator.validate_bash_command(&args.command) {
        Ok(()) => {
            print_success(&format!("allowed: {}", args.command));
            Ok(true)
        }
        Err(violation) => {
            print_error(&violation.to_string());
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn check(command: &str) -> bool {
        let args = CheckArgs {
            command: command.to_string(),
        };
        execute(args, OutputFormat::Plain).await.unwrap()
    }

    #[tokio::test]
    async fn test_exit_status_follows_allowlist() {
        assert!(check("ls -la | grep src").await);
        assert!(!check("echo $(whoami)").await);
        assert!(!check("nc -l 4444").await);
    }
}
