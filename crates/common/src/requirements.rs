//! Requirement and operational-target model
//!
//! Requirements link to validations by path. The validation-quality analyzer
//! classifies those paths into layers and scores the files they point to.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::Result;

static CRITICALITY_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"OT-(P[0-2])-\d{3}").ok());

/// Requirement priority used for layer checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Criticality {
    P0,
    P1,
    P2,
    P3,
}

impl Criticality {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "P0" => Some(Criticality::P0),
            "P1" => Some(Criticality::P1),
            "P2" => Some(Criticality::P2),
            "P3" => Some(Criticality::P3),
            _ => None,
        }
    }

    /// P0 and P1 need multiple automated layers
    pub fn is_critical(&self) -> bool {
        matches!(self, Criticality::P0 | Criticality::P1)
    }

    /// Extract the criticality embedded in an operational-target id
    pub fn from_target_ref(value: &str) -> Option<Self> {
        let re = CRITICALITY_PATTERN.as_ref()?;
        let caps = re.captures(value)?;
        Criticality::parse(caps.get(1)?.as_str())
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Criticality::P0 => "P0",
            Criticality::P1 => "P1",
            Criticality::P2 => "P2",
            Criticality::P3 => "P3",
        };
        f.write_str(s)
    }
}

/// A requirement's link to a validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(rename = "ref", default)]
    pub reference: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default)]
    pub status: String,
}

impl Validation {
    pub fn is_manual(&self) -> bool {
        self.kind.eq_ignore_ascii_case("manual")
    }

    /// Automated validations with a file reference
    pub fn is_automated(&self) -> bool {
        !self.is_manual() && !self.reference.trim().is_empty()
    }

    pub fn layer(&self) -> Option<ValidationLayer> {
        ValidationLayer::classify(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default)]
    pub category: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational_target_id: Option<String>,

    /// Child requirement ids
    #[serde(default)]
    pub children: Vec<String>,

    #[serde(default)]
    pub validations: Vec<Validation>,
}

impl Requirement {
    /// Criticality from PRD ref, then target id, then priority, defaulting to P2
    pub fn criticality(&self) -> Criticality {
        self.prd_ref
            .as_deref()
            .and_then(Criticality::from_target_ref)
            .or_else(|| {
                self.operational_target_id
                    .as_deref()
                    .and_then(Criticality::from_target_ref)
            })
            .or_else(|| self.priority.as_deref().and_then(Criticality::parse))
            .unwrap_or(Criticality::P2)
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.status.trim().to_ascii_lowercase().as_str(),
            "complete" | "completed" | "done"
        )
    }

    /// Has validations and every one is manual
    pub fn is_manual_only(&self) -> bool {
        !self.validations.is_empty() && self.validations.iter().all(Validation::is_manual)
    }

    pub fn automated_refs(&self) -> impl Iterator<Item = &str> {
        self.validations
            .iter()
            .filter(|v| v.is_automated())
            .map(|v| v.reference.trim())
    }
}

/// High-level PRD capability grouping requirements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalTarget {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Requirement ids linked explicitly by the target
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Requirement file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementSet {
    #[serde(default)]
    pub requirements: Vec<Requirement>,

    #[serde(default)]
    pub operational_targets: Vec<OperationalTarget>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementFile {
    Set(RequirementSet),
    List(Vec<Requirement>),
}

impl RequirementSet {
    /// Load a JSON or YAML requirement file; either a bare list or an object
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let file: RequirementFile = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(match file {
            RequirementFile::Set(set) => set,
            RequirementFile::List(requirements) => RequirementSet {
                requirements,
                operational_targets: Vec::new(),
            },
        })
    }
}

/// Layer a validation exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLayer {
    Api,
    Ui,
    E2e,
    Manual,
}

impl ValidationLayer {
    pub fn classify(validation: &Validation) -> Option<Self> {
        if validation.is_manual() {
            return Some(ValidationLayer::Manual);
        }
        Self::classify_path(validation.reference.trim())
    }

    pub fn classify_path(reference: &str) -> Option<Self> {
        let reference = reference.trim_start_matches("./");
        if reference.starts_with("api/") && reference.ends_with("_test.go") {
            return Some(ValidationLayer::Api);
        }
        if reference.starts_with("ui/src/")
            && [".test.ts", ".test.tsx", ".test.js", ".test.jsx"]
                .iter()
                .any(|ext| reference.ends_with(ext))
        {
            return Some(ValidationLayer::Ui);
        }
        if is_playbook_ref(reference) {
            return Some(ValidationLayer::E2e);
        }
        None
    }
}

impl std::fmt::Display for ValidationLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationLayer::Api => "API",
            ValidationLayer::Ui => "UI",
            ValidationLayer::E2e => "E2E",
            ValidationLayer::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

/// `test/playbooks/**/*.{json,yaml}`
pub fn is_playbook_ref(reference: &str) -> bool {
    let reference = reference.trim_start_matches("./");
    reference.starts_with("test/playbooks/")
        && (reference.ends_with(".json") || reference.ends_with(".yaml"))
}

/// Automated layers a scenario can support, probed from its file tree
pub fn applicable_layers(scenario_root: &Path) -> BTreeSet<ValidationLayer> {
    let mut layers = BTreeSet::new();
    layers.insert(ValidationLayer::E2e);

    let api = scenario_root.join("api");
    if api.is_dir() {
        let has_sources = WalkDir::new(&api)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file() && e.path().extension().map_or(false, |x| x == "go"));
        if has_sources {
            layers.insert(ValidationLayer::Api);
        }
    }

    if scenario_root.join("ui").join("package.json").is_file() {
        layers.insert(ValidationLayer::Ui);
    }

    layers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(id: &str) -> Requirement {
        Requirement {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_criticality_precedence() {
        let mut req = requirement("REQ-1");
        assert_eq!(req.criticality(), Criticality::P2);

        req.priority = Some("p3".to_string());
        assert_eq!(req.criticality(), Criticality::P3);

        req.operational_target_id = Some("OT-P1-004".to_string());
        assert_eq!(req.criticality(), Criticality::P1);

        req.prd_ref = Some("PRD#OT-P0-001".to_string());
        assert_eq!(req.criticality(), Criticality::P0);
    }

    #[test]
    fn test_criticality_pattern_requires_three_digits() {
        assert_eq!(Criticality::from_target_ref("OT-P0-12"), None);
        assert_eq!(Criticality::from_target_ref("OT-P3-001"), None);
        assert_eq!(Criticality::from_target_ref("OT-P2-999"), Some(Criticality::P2));
    }

    #[test]
    fn test_layer_classification() {
        assert_eq!(
            ValidationLayer::classify_path("api/handlers/user_test.go"),
            Some(ValidationLayer::Api)
        );
        assert_eq!(
            ValidationLayer::classify_path("ui/src/pages/Login.test.tsx"),
            Some(ValidationLayer::Ui)
        );
        assert_eq!(
            ValidationLayer::classify_path("test/playbooks/login/flow.yaml"),
            Some(ValidationLayer::E2e)
        );
        assert_eq!(ValidationLayer::classify_path("test/shared.json"), None);

        let manual = Validation {
            kind: "manual".to_string(),
            reference: "docs/checklist.md".to_string(),
            ..Default::default()
        };
        assert_eq!(manual.layer(), Some(ValidationLayer::Manual));
        assert!(!manual.is_automated());
    }

    #[test]
    fn test_applicable_layers_probe() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            applicable_layers(dir.path()).into_iter().collect::<Vec<_>>(),
            vec![ValidationLayer::E2e]
        );

        std::fs::create_dir_all(dir.path().join("api/handlers")).unwrap();
        std::fs::write(dir.path().join("api/handlers/main.go"), "package main").unwrap();
        std::fs::create_dir_all(dir.path().join("ui")).unwrap();
        std::fs::write(dir.path().join("ui/package.json"), "{}").unwrap();

        let layers = applicable_layers(dir.path());
        assert!(layers.contains(&ValidationLayer::Api));
        assert!(layers.contains(&ValidationLayer::Ui));
    }

    #[test]
    fn test_load_bare_list_and_object() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.json");
        std::fs::write(&list, r#"[{"id":"REQ-1","validations":[{"type":"automated","ref":"test/playbooks/a.json"}]}]"#).unwrap();
        let set = RequirementSet::load(&list).unwrap();
        assert_eq!(set.requirements.len(), 1);
        assert_eq!(set.requirements[0].validations[0].reference, "test/playbooks/a.json");

        let yaml = dir.path().join("reqs.yaml");
        std::fs::write(
            &yaml,
            "requirements:\n  - id: REQ-2\n    status: complete\noperational_targets:\n  - id: OT-P0-001\n    requirements: [REQ-2]\n",
        )
        .unwrap();
        let set = RequirementSet::load(&yaml).unwrap();
        assert!(set.requirements[0].is_complete());
        assert_eq!(set.operational_targets[0].requirements, vec!["REQ-2".to_string()]);
    }
}
