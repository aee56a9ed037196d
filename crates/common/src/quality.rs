//! Validation Quality Analysis
//!
//! Examines requirement-to-test linkage for patterns that inflate coverage
//! without testing much:
//! - Test count suspiciously equal to requirement count
//! - Tests stored outside the recognised locations
//! - One test file standing in for many requirements
//! - Operational targets holding a single requirement each
//! - Critical requirements validated by fewer than two automated layers
//! - Referenced tests with little real content
//! - Requirements validated only by hand
//!
//! The analyzer never fails. Inputs it cannot read become low-severity findings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::requirements::{
    applicable_layers, is_playbook_ref, OperationalTarget, Requirement, ValidationLayer,
};
use crate::scope::normalize_relative;
use crate::test_files::{assess_reference, TestFileQuality};
use crate::types::Severity;

// ============================================================================
// Configuration
// ============================================================================

/// Detector thresholds and penalty caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Ratio distance from 1.0 considered suspicious
    pub coverage_ratio_tolerance: f64,
    pub coverage_penalty: u32,

    pub invalid_location_max_penalty: u32,

    /// Requirements per file at which a file counts as monolithic
    pub monolithic_threshold: usize,
    /// Requirements per file at which severity becomes high
    pub monolithic_high_threshold: usize,
    pub monolithic_penalty_per_link: u32,
    pub monolithic_max_penalty: u32,

    pub ungrouped_max_ratio: f64,
    pub ungrouped_max_penalty: u32,

    pub min_automated_layers: usize,
    pub layers_max_penalty: u32,

    pub superficial_max_penalty: u32,

    pub manual_ratio_threshold: f64,
    pub complete_manual_threshold: usize,
    pub manual_max_penalty: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            coverage_ratio_tolerance: 0.10,
            coverage_penalty: 5,
            invalid_location_max_penalty: 25,
            monolithic_threshold: 4,
            monolithic_high_threshold: 5,
            monolithic_penalty_per_link: 2,
            monolithic_max_penalty: 15,
            ungrouped_max_ratio: 0.20,
            ungrouped_max_penalty: 10,
            min_automated_layers: 2,
            layers_max_penalty: 20,
            superficial_max_penalty: 10,
            manual_ratio_threshold: 0.10,
            complete_manual_threshold: 5,
            manual_max_penalty: 15,
        }
    }
}

impl QualityConfig {
    /// Upper bound of the total penalty
    pub fn max_total_penalty(&self) -> u32 {
        self.coverage_penalty
            + self.invalid_location_max_penalty
            + self.monolithic_max_penalty
            + self.ungrouped_max_penalty
            + self.layers_max_penalty
            + self.superficial_max_penalty
            + self.manual_max_penalty
    }
}

// ============================================================================
// Analysis Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    InsufficientTestCoverage,
    InvalidTestLocation,
    MonolithicTestFiles,
    UngroupedOperationalTargets,
    InsufficientValidationLayers,
    SuperficialTestImplementation,
    MissingTestAutomation,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::InsufficientTestCoverage => "insufficient_test_coverage",
            IssueType::InvalidTestLocation => "invalid_test_location",
            IssueType::MonolithicTestFiles => "monolithic_test_files",
            IssueType::UngroupedOperationalTargets => "ungrouped_operational_targets",
            IssueType::InsufficientValidationLayers => "insufficient_validation_layers",
            IssueType::SuperficialTestImplementation => "superficial_test_implementation",
            IssueType::MissingTestAutomation => "missing_test_automation",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub count: usize,
    pub penalty: u32,
    pub max_penalty: u32,
    /// Requirement ids or file refs involved
    pub affected: Vec<String>,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationQualityAnalysis {
    pub has_issues: bool,
    pub issue_count: usize,
    pub issues: Vec<QualityIssue>,
    pub total_penalty: u32,
    /// Absent when there are no issues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_severity: Option<Severity>,
}

impl ValidationQualityAnalysis {
    pub fn issue(&self, issue_type: IssueType) -> Option<&QualityIssue> {
        self.issues.iter().find(|i| i.issue_type == issue_type)
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Offline analyzer over requirements, targets and the scenario tree
#[derive(Debug, Clone, Default)]
pub struct ValidationQualityAnalyzer {
    config: QualityConfig,
}

/// Facts shared by the detectors
struct Linkage<'a> {
    requirements: &'a [Requirement],
    /// Automated ref occurrences, one per validation
    ref_occurrences: Vec<&'a str>,
    /// Distinct automated ref -> distinct requirement ids
    ref_links: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl<'a> Linkage<'a> {
    fn build(requirements: &'a [Requirement]) -> Self {
        let mut ref_occurrences = Vec::new();
        let mut ref_links: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for req in requirements {
            for reference in req.automated_refs() {
                ref_occurrences.push(reference);
                ref_links.entry(reference).or_default().insert(req.id.as_str());
            }
        }
        Self {
            requirements,
            ref_occurrences,
            ref_links,
        }
    }
}

impl ValidationQualityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Analyze requirement linkage for a scenario
    pub fn analyze(
        &self,
        requirements: &[Requirement],
        targets: &[OperationalTarget],
        scenario_root: &Path,
    ) -> ValidationQualityAnalysis {
        info!(
            requirements = requirements.len(),
            targets = targets.len(),
            "Analyzing validation quality: {}",
            scenario_root.display()
        );

        let linkage = Linkage::build(requirements);
        let mut issues = Vec::new();

        self.detect_suspicious_ratio(&linkage, &mut issues);
        self.detect_invalid_locations(&linkage, &mut issues);
        self.detect_monolithic_files(&linkage, &mut issues);
        self.detect_ungrouped_targets(requirements, targets, &mut issues);
        self.detect_insufficient_layers(requirements, scenario_root, &mut issues);
        self.detect_superficial_tests(&linkage, scenario_root, &mut issues);
        self.detect_missing_automation(requirements, &mut issues);

        self.summarize(issues)
    }

    fn detect_suspicious_ratio(&self, linkage: &Linkage<'_>, issues: &mut Vec<QualityIssue>) {
        let req_count = linkage.requirements.len();
        let test_count = linkage.ref_links.len();
        if req_count == 0 || test_count == 0 {
            return;
        }

        let ratio = test_count as f64 / req_count as f64;
        if (ratio - 1.0).abs() < self.config.coverage_ratio_tolerance {
            debug!(ratio, "suspicious 1:1 test ratio");
            issues.push(QualityIssue {
                issue_type: IssueType::InsufficientTestCoverage,
                severity: Severity::Medium,
                description: format!(
                    "{} test files for {} requirements (ratio {:.2}) suggests one generated test per requirement",
                    test_count, req_count, ratio
                ),
                count: test_count,
                penalty: self.config.coverage_penalty,
                max_penalty: self.config.coverage_penalty,
                affected: Vec::new(),
                recommendation:
                    "Write tests around user flows that each exercise several requirements".to_string(),
            });
        }
    }

    fn detect_invalid_locations(&self, linkage: &Linkage<'_>, issues: &mut Vec<QualityIssue>) {
        let total = linkage.ref_occurrences.len();
        if total == 0 {
            return;
        }

        let invalid: Vec<&str> = linkage
            .ref_occurrences
            .iter()
            .copied()
            .filter(|r| is_invalid_location(r))
            .collect();
        if invalid.is_empty() {
            return;
        }

        let ratio = invalid.len() as f64 / total as f64;
        let max = self.config.invalid_location_max_penalty;
        let affected: BTreeSet<String> = invalid.iter().map(|r| r.to_string()).collect();
        debug!(invalid = invalid.len(), total, "invalid test locations");

        issues.push(QualityIssue {
            issue_type: IssueType::InvalidTestLocation,
            severity: if ratio > 0.5 { Severity::High } else { Severity::Medium },
            description: format!(
                "{} of {} validation refs point outside recognised test locations",
                invalid.len(),
                total
            ),
            count: invalid.len(),
            penalty: scaled(ratio, max),
            max_penalty: max,
            affected: affected.into_iter().collect(),
            recommendation:
                "Place playbooks under test/playbooks/ and unit tests next to the code they test"
                    .to_string(),
        });
    }

    fn detect_monolithic_files(&self, linkage: &Linkage<'_>, issues: &mut Vec<QualityIssue>) {
        let offenders: Vec<(&str, usize)> = linkage
            .ref_links
            .iter()
            .filter(|(_, reqs)| reqs.len() >= self.config.monolithic_threshold)
            .map(|(r, reqs)| (*r, reqs.len()))
            .collect();
        if offenders.is_empty() {
            return;
        }

        let violations: usize = offenders.iter().map(|(_, n)| n).sum();
        let widest = offenders.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let max = self.config.monolithic_max_penalty;
        let penalty = (violations as u32)
            .saturating_mul(self.config.monolithic_penalty_per_link)
            .min(max);
        debug!(files = offenders.len(), violations, "monolithic test files");

        issues.push(QualityIssue {
            issue_type: IssueType::MonolithicTestFiles,
            severity: if widest >= self.config.monolithic_high_threshold {
                Severity::High
            } else {
                Severity::Medium
            },
            description: offenders
                .iter()
                .map(|(r, n)| format!("{} validates {} requirements", r, n))
                .collect::<Vec<_>>()
                .join("; "),
            count: violations,
            penalty,
            max_penalty: max,
            affected: offenders.iter().map(|(r, _)| r.to_string()).collect(),
            recommendation: "Split shared test files so each covers a focused set of requirements"
                .to_string(),
        });
    }

    fn detect_ungrouped_targets(
        &self,
        requirements: &[Requirement],
        targets: &[OperationalTarget],
        issues: &mut Vec<QualityIssue>,
    ) {
        // target id -> linked requirement ids
        let mut links: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        if targets.is_empty() {
            for req in requirements {
                if let Some(target) = req.operational_target_id.as_deref() {
                    links.entry(target).or_default().insert(req.id.as_str());
                }
            }
        } else {
            for target in targets {
                let entry = links.entry(target.id.as_str()).or_default();
                entry.extend(target.requirements.iter().map(String::as_str));
            }
            for req in requirements {
                if let Some(linked) = req
                    .operational_target_id
                    .as_deref()
                    .and_then(|t| links.get_mut(t))
                {
                    linked.insert(req.id.as_str());
                }
            }
        }

        let total = links.len();
        if total == 0 {
            return;
        }

        let singles: Vec<&str> = links
            .iter()
            .filter(|(_, reqs)| reqs.len() == 1)
            .map(|(t, _)| *t)
            .collect();
        let ratio = singles.len() as f64 / total as f64;
        let acceptable = self.config.ungrouped_max_ratio.min(5.0 / total as f64);
        if ratio <= acceptable {
            return;
        }

        let max = self.config.ungrouped_max_penalty;
        debug!(singles = singles.len(), total, "ungrouped operational targets");
        issues.push(QualityIssue {
            issue_type: IssueType::UngroupedOperationalTargets,
            severity: if ratio > 0.5 { Severity::High } else { Severity::Medium },
            description: format!(
                "{} of {} operational targets hold exactly one requirement ({:.0}% > {:.0}% acceptable)",
                singles.len(),
                total,
                ratio * 100.0,
                acceptable * 100.0
            ),
            count: singles.len(),
            penalty: scaled(ratio, max),
            max_penalty: max,
            affected: singles.iter().map(|t| t.to_string()).collect(),
            recommendation: "Group related requirements under shared operational targets".to_string(),
        });
    }

    fn detect_insufficient_layers(
        &self,
        requirements: &[Requirement],
        scenario_root: &Path,
        issues: &mut Vec<QualityIssue>,
    ) {
        let critical: Vec<&Requirement> = requirements
            .iter()
            .filter(|r| r.criticality().is_critical())
            .collect();
        if critical.is_empty() {
            return;
        }

        let applicable = applicable_layers(scenario_root);
        let required = self.config.min_automated_layers.min(applicable.len());

        let lacking: Vec<&str> = critical
            .iter()
            .filter(|req| {
                let layers: BTreeSet<ValidationLayer> = req
                    .validations
                    .iter()
                    .filter_map(|v| v.layer())
                    .filter(|l| *l != ValidationLayer::Manual && applicable.contains(l))
                    .collect();
                layers.len() < required
            })
            .map(|req| req.id.as_str())
            .collect();
        if lacking.is_empty() {
            return;
        }

        let ratio = lacking.len() as f64 / critical.len() as f64;
        let max = self.config.layers_max_penalty;
        let layer_names: Vec<String> = applicable.iter().map(|l| l.to_string()).collect();
        debug!(lacking = lacking.len(), critical = critical.len(), "insufficient layers");

        issues.push(QualityIssue {
            issue_type: IssueType::InsufficientValidationLayers,
            severity: if ratio > 0.5 { Severity::High } else { Severity::Medium },
            description: format!(
                "{} of {} P0/P1 requirements have fewer than {} automated layers (applicable: {})",
                lacking.len(),
                critical.len(),
                required,
                layer_names.join(", ")
            ),
            count: lacking.len(),
            penalty: scaled(ratio, max),
            max_penalty: max,
            affected: lacking.iter().map(|id| id.to_string()).collect(),
            recommendation: "Validate critical requirements at more than one layer".to_string(),
        });
    }

    fn detect_superficial_tests(
        &self,
        linkage: &Linkage<'_>,
        scenario_root: &Path,
        issues: &mut Vec<QualityIssue>,
    ) {
        let assessed: Vec<TestFileQuality> = linkage
            .ref_links
            .keys()
            .map(|reference| assess_reference(scenario_root, reference))
            .collect();

        let low: Vec<&TestFileQuality> = assessed.iter().filter(|q| !q.meaningful).collect();
        if low.is_empty() {
            return;
        }

        let max = self.config.superficial_max_penalty;
        let missing = low.iter().filter(|q| !q.exists).count();
        debug!(low = low.len(), missing, "superficial tests");

        issues.push(QualityIssue {
            issue_type: IssueType::SuperficialTestImplementation,
            severity: if low.len() > 3 { Severity::Medium } else { Severity::Low },
            description: format!(
                "{} of {} referenced test files are superficial ({} missing)",
                low.len(),
                assessed.len(),
                missing
            ),
            count: low.len(),
            penalty: (low.len() as u32).min(max),
            max_penalty: max,
            affected: low
                .iter()
                .map(|q| format!("{}: {}", q.path, q.problems.join(", ")))
                .collect(),
            recommendation: "Add real assertions and several test cases to each referenced file"
                .to_string(),
        });
    }

    fn detect_missing_automation(&self, requirements: &[Requirement], issues: &mut Vec<QualityIssue>) {
        if requirements.is_empty() {
            return;
        }

        let manual: Vec<&Requirement> = requirements.iter().filter(|r| r.is_manual_only()).collect();
        let manual_ratio = manual.len() as f64 / requirements.len() as f64;
        let complete_manual = manual.iter().filter(|r| r.is_complete()).count();

        if manual_ratio <= self.config.manual_ratio_threshold
            && complete_manual < self.config.complete_manual_threshold
        {
            return;
        }

        let max = self.config.manual_max_penalty;
        let penalty = ((manual_ratio * 10.0).round() as u32
            + complete_manual.min(self.config.complete_manual_threshold) as u32)
            .min(max);
        debug!(manual = manual.len(), complete_manual, "missing automation");

        issues.push(QualityIssue {
            issue_type: IssueType::MissingTestAutomation,
            severity: if penalty >= 10 { Severity::High } else { Severity::Medium },
            description: format!(
                "{} of {} requirements are validated only manually ({} marked complete)",
                manual.len(),
                requirements.len(),
                complete_manual
            ),
            count: manual.len(),
            penalty,
            max_penalty: max,
            affected: manual.iter().map(|r| r.id.clone()).collect(),
            recommendation: "Automate manual validations with playbooks or unit tests".to_string(),
        });
    }

    fn summarize(&self, mut issues: Vec<QualityIssue>) -> ValidationQualityAnalysis {
        for issue in &mut issues {
            issue.penalty = issue.penalty.min(issue.max_penalty);
        }

        let sum: u32 = issues.iter().map(|i| i.penalty).sum();
        let total_penalty = sum.min(self.config.max_total_penalty());

        let overall_severity = if issues.iter().any(|i| i.severity == Severity::High) {
            Some(Severity::High)
        } else if !issues.is_empty() {
            Some(Severity::Medium)
        } else {
            None
        };

        info!(
            issues = issues.len(),
            total_penalty,
            severity = ?overall_severity,
            "Validation quality analysis complete"
        );

        ValidationQualityAnalysis {
            has_issues: !issues.is_empty(),
            issue_count: issues.len(),
            issues,
            total_penalty,
            overall_severity,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `round(ratio * max)`, capped at `max`
fn scaled(ratio: f64, max: u32) -> u32 {
    ((ratio * max as f64).round() as u32).min(max)
}

/// Refs under `test/` must be playbooks; absolute or escaping refs are always invalid
fn is_invalid_location(reference: &str) -> bool {
    let path = Path::new(reference);
    if path.is_absolute() || normalize_relative(path).is_none() {
        return true;
    }
    let reference = reference.trim_start_matches("./");
    reference.starts_with("test/") && !is_playbook_ref(reference)
}
