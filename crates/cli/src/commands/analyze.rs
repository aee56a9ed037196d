//! `basrun analyze`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use basrun_common::{QualityIssue, RequirementSet, ValidationQualityAnalyzer};

use crate::output::{print_list, print_success, print_value, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Scenario root directory
    #[arg(long, default_value = ".")]
    pub scenario: PathBuf,

    /// Requirement file (JSON or YAML)
    #[arg(long)]
    pub requirements: PathBuf,
}

#[derive(Serialize)]
struct IssueRow<'a>(&'a QualityIssue);

impl TableDisplay for IssueRow<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["Issue", "Severity", "Count", "Penalty", "Description"]
    }

    fn row(&self) -> Vec<String> {
        let issue = self.0;
        vec![
            issue.issue_type.to_string(),
            issue.severity.to_string(),
            issue.count.to_string(),
            format!("{}/{}", issue.penalty, issue.max_penalty),
            issue.description.clone(),
        ]
    }
}

/// Succeeds whether or not issues are found
pub async fn execute(args: AnalyzeArgs, format: OutputFormat) -> Result<bool> {
    let set = RequirementSet::load(&args.requirements)
        .with_context(|| format!("loading {}", args.requirements.display()))?;
    let analysis =
        ValidationQualityAnalyzer::new().analyze(&set.requirements, &set.operational_targets, &args.scenario);

    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_value(&analysis, format)?,
        OutputFormat::Table | OutputFormat::Plain => {
            if !analysis.has_issues {
                print_success(&format!("No validation quality issues in {} requirements", set.requirements.len()));
                return Ok(true);
            }
            let rows: Vec<_> = analysis.issues.iter().map(IssueRow).collect();
            print_list(&rows, format)?;
            if let Some(severity) = analysis.overall_severity {
                print_warning(&format!(
                    "Total penalty {} (overall severity {})",
                    analysis.total_penalty, severity
                ));
            }
            for issue in &analysis.issues {
                println!("  {}: {}", issue.issue_type, issue.recommendation);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_requirements(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("requirements.json");
        let requirements = json!([
            {"id": "REQ-001", "title": "Login", "validations": [{"type": "manual", "ref": "docs/login.md"}]},
            {"id": "REQ-002", "title": "Logout", "validations": []}
        ]);
        std::fs::write(&path, serde_json::to_vec(&requirements).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_issues_do_not_fail_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let requirements = write_requirements(dir.path());

        for format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Plain] {
            let args = AnalyzeArgs {
                scenario: dir.path().to_path_buf(),
                requirements: requirements.clone(),
            };
            assert!(execute(args, format).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_missing_requirements_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = AnalyzeArgs {
            scenario: dir.path().to_path_buf(),
            requirements: dir.path().join("absent.json"),
        };
        let err = execute(args, OutputFormat::Table).await.unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn test_issue_row_penalty_column() {
        let issue = QualityIssue {
            issue_type: basrun_common::IssueType::MissingTestAutomation,
            severity: basrun_common::Severity::Medium,
            description: "1 requirement validated manually".to_string(),
            count: 1,
            penalty: 3,
            max_penalty: 10,
            affected: vec!["REQ-001".to_string()],
            recommendation: "Automate".to_string(),
        };
        let row = IssueRow(&issue).row();
        assert_eq!(row.len(), IssueRow::headers().len());
        assert_eq!(row[3], "3/10");
    }
}
