//! Validation quality analyzer tests
//!
//! Builds small scenario trees on disk and checks the detectors end to end.

use std::fs;
use std::path::Path;

use basrun_common::{
    IssueType, QualityConfig, Requirement, RequirementSet, Severity, Validation,
    ValidationQualityAnalyzer,
};
use tempfile::TempDir;
use test_case::test_case;

fn automated(reference: &str) -> Validation {
    Validation {
        kind: "automated".to_string(),
        reference: reference.to_string(),
        workflow_id: None,
        status: "passing".to_string(),
    }
}

fn requirement(id: &str, validations: Vec<Validation>) -> Requirement {
    Requirement {
        id: id.to_string(),
        title: format!("Requirement {}", id),
        status: "in_progress".to_string(),
        validations,
        ..Default::default()
    }
}

/// Write a playbook large enough to pass the structural check
fn write_playbook(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let doc = serde_json::json!({
        "nodes": [
            {"id": "open", "type": "navigate", "data": {"url": "${BASE_URL}/"}},
            {"id": "check", "type": "assert", "data": {"selector": "@selector/header", "mode": "visible"}}
        ],
        "edges": [{"id": "e1", "source": "open", "target": "check"}]
    });
    fs::write(path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
}

#[test]
fn monolithic_shared_file_across_five_requirements() {
    let dir = TempDir::new().unwrap();
    let requirements: Vec<Requirement> = (1..=5)
        .map(|i| requirement(&format!("REQ-{:03}", i), vec![automated("test/shared.json")]))
        .collect();

    let analysis = ValidationQualityAnalyzer::new().analyze(&requirements, &[], dir.path());

    let monolithic: Vec<_> = analysis
        .issues
        .iter()
        .filter(|i| i.issue_type == IssueType::MonolithicTestFiles)
        .collect();
    assert_eq!(monolithic.len(), 1);
    assert_eq!(monolithic[0].count, 5);
    assert_eq!(monolithic[0].severity, Severity::High);
    assert_eq!(monolithic[0].penalty, 10);
    assert_eq!(analysis.overall_severity, Some(Severity::High));
}

#[test]
fn suspicious_one_to_one_ratio() {
    let dir = TempDir::new().unwrap();
    let requirements: Vec<Requirement> = (1..=10)
        .map(|i| {
            let rel = format!("test/playbooks/req-{:02}.json", i);
            write_playbook(dir.path(), &rel);
            requirement(&format!("REQ-{:03}", i), vec![automated(&rel)])
        })
        .collect();

    let analysis = ValidationQualityAnalyzer::new().analyze(&requirements, &[], dir.path());

    let coverage = analysis
        .issue(IssueType::InsufficientTestCoverage)
        .expect("coverage issue");
    assert_eq!(coverage.penalty, 5);
    assert!(analysis.issue(IssueType::InvalidTestLocation).is_none());
    assert!(analysis.issue(IssueType::SuperficialTestImplementation).is_none());
}

#[test]
fn shared_flows_avoid_ratio_issue() {
    let dir = TempDir::new().unwrap();
    write_playbook(dir.path(), "test/playbooks/checkout.json");
    write_playbook(dir.path(), "test/playbooks/login.json");

    let requirements: Vec<Requirement> = (1..=10)
        .map(|i| {
            let flow = if i % 2 == 0 { "checkout" } else { "login" };
            requirement(
                &format!("REQ-{:03}", i),
                vec![automated(&format!("test/playbooks/{}.json", flow))],
            )
        })
        .collect();

    let analysis = ValidationQualityAnalyzer::new().analyze(&requirements, &[], dir.path());
    assert!(analysis.issue(IssueType::InsufficientTestCoverage).is_none());
}

#[test_case(0.5, 13 ; "half invalid")]
#[test_case(1.0, 25 ; "all invalid")]
#[test_case(0.25, 6 ; "quarter invalid")]
fn invalid_location_penalty_scales(ratio: f64, expected: u32) {
    let dir = TempDir::new().unwrap();
    let total = 8;
    let invalid = (total as f64 * ratio) as usize;

    let requirements: Vec<Requirement> = (0..total)
        .map(|i| {
            let rel = if i < invalid {
                format!("test/unit/req_{}.js", i)
            } else {
                format!("test/playbooks/req-{}.json", i)
            };
            requirement(&format!("REQ-{}", i), vec![automated(&rel)])
        })
        .collect();

    let analysis = ValidationQualityAnalyzer::new().analyze(&requirements, &[], dir.path());
    let issue = analysis.issue(IssueType::InvalidTestLocation).unwrap();
    assert_eq!(issue.count, invalid);
    assert_eq!(issue.penalty, expected);
    assert_eq!(issue.severity == Severity::High, ratio > 0.5);
}

#[test]
fn total_penalty_is_clamped_sum() {
    let dir = TempDir::new().unwrap();
    let mut requirements: Vec<Requirement> = (0..12)
        .map(|i| {
            let mut r = requirement(&format!("REQ-{}", i), vec![automated("test/everything.js")]);
            r.prd_ref = Some(format!("OT-P0-{:03}", i));
            r.operational_target_id = Some(format!("OT-P0-{:03}", i));
            r
        })
        .collect();
    for i in 0..8 {
        let mut r = requirement(
            &format!("REQ-M{}", i),
            vec![Validation {
                kind: "manual".to_string(),
                reference: String::new(),
                workflow_id: None,
                status: "passing".to_string(),
            }],
        );
        r.status = "complete".to_string();
        requirements.push(r);
    }

    let analyzer = ValidationQualityAnalyzer::new();
    let analysis = analyzer.analyze(&requirements, &[], dir.path());

    let sum: u32 = analysis.issues.iter().map(|i| i.penalty).sum();
    assert!(analysis.has_issues);
    assert_eq!(analysis.issue_count, analysis.issues.len());
    assert_eq!(analysis.total_penalty, sum.min(analyzer.config().max_total_penalty()));
    assert!(analysis.total_penalty <= 100);
    for issue in &analysis.issues {
        assert!(issue.penalty <= issue.max_penalty, "{:?}", issue);
    }
}

#[test]
fn custom_config_caps() {
    let dir = TempDir::new().unwrap();
    let requirements: Vec<Requirement> = (1..=8)
        .map(|i| requirement(&format!("REQ-{}", i), vec![automated("test/playbooks/all.json")]))
        .collect();

    let config = QualityConfig {
        monolithic_max_penalty: 6,
        ..Default::default()
    };
    let analysis = ValidationQualityAnalyzer::with_config(config).analyze(&requirements, &[], dir.path());
    assert_eq!(analysis.issue(IssueType::MonolithicTestFiles).unwrap().penalty, 6);
}

#[test]
fn requirements_file_round_trip_through_loader() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("requirements.json");
    fs::write(
        &path,
        serde_json::json!({
            "requirements": [
                {"id": "REQ-001", "prd_ref": "OT-P0-001", "validations": [{"type": "automated", "ref": "test/playbooks/a.json"}]}
            ],
            "operational_targets": [{"id": "OT-P0-001", "requirements": ["REQ-001"]}]
        })
        .to_string(),
    )
    .unwrap();

    let set = RequirementSet::load(&path).unwrap();
    let analysis =
        ValidationQualityAnalyzer::new().analyze(&set.requirements, &set.operational_targets, dir.path());

    // One target with one requirement: 100% ungrouped against a 20% allowance
    let ungrouped = analysis.issue(IssueType::UngroupedOperationalTargets).unwrap();
    assert_eq!(ungrouped.penalty, 10);
    // Referenced playbook is absent on disk
    assert!(analysis.issue(IssueType::SuperficialTestImplementation).is_some());
}
