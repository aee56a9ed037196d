//! Registry and workflow graph documents

use std::convert::Infallible;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ResolveError;

/// File name of the registry inside the registry directory
pub const REGISTRY_FILE: &str = "registry.json";

/// Ordered list of playbooks to execute in a scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: String,
    pub playbooks: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Workflow file, relative to the scenario root
    pub file: String,

    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default)]
    pub description: String,
}

impl RegistryEntry {
    /// Workflow name: the file stem
    pub fn name(&self) -> String {
        Path::new(&self.file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.clone())
    }

    /// Filesystem-safe artifact directory name derived from the file path
    pub fn slug(&self) -> String {
        let without_ext = Path::new(&self.file).with_extension("");
        let raw = without_ext.to_string_lossy();
        let trimmed = raw
            .trim_start_matches("bas/cases/")
            .trim_start_matches("bas/")
            .trim_start_matches('/');

        let slug: String = trimmed
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let slug = slug.trim_matches('-').to_string();
        if slug.is_empty() {
            "workflow".to_string()
        } else {
            slug
        }
    }
}

impl Registry {
    /// Parse a registry document, checking the version and list shape
    pub fn parse(raw: &str, path: &Path) -> Result<Self, ResolveError> {
        let invalid = |reason: String| ResolveError::Registry {
            path: path.display().to_string(),
            reason,
        };

        let value: Value = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| invalid("expected a JSON object".to_string()))?;

        match object.get("version") {
            Some(Value::String(v)) if !v.trim().is_empty() => {}
            Some(_) => return Err(invalid("'version' must be a non-empty string".to_string())),
            None => return Err(invalid("missing 'version'".to_string())),
        }
        match object.get("playbooks") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(invalid("'playbooks' must be a list".to_string())),
            None => return Err(invalid("missing 'playbooks'".to_string())),
        }

        let registry: Registry = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        if let Some(pos) = registry.playbooks.iter().position(|e| e.file.trim().is_empty()) {
            return Err(invalid(format!("playbook #{} has an empty 'file'", pos)));
        }
        Ok(registry)
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }
}

// ============================================================================
// Workflow graph
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,

    #[serde(rename = "type", default)]
    pub node_type: String,

    #[serde(default)]
    pub data: Map<String, Value>,

    /// Editor fields such as `position`, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A workflow graph as authored: `{nodes, edges, metadata}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,

    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A workflow with every token expanded, ready for the worker
pub type ResolvedWorkflow = WorkflowDefinition;

impl WorkflowDefinition {
    pub fn parse(raw: &str, path: &Path) -> Result<Self, ResolveError> {
        serde_json::from_str(raw).map_err(|e| ResolveError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Fixture id declared in metadata, if this file is a fixture
    pub fn fixture_id(&self) -> Option<&str> {
        self.metadata
            .get("fixture_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn is_fixture(&self) -> bool {
        self.fixture_id().is_some()
    }

    /// Capability names listed under metadata `requires`
    pub fn required_capabilities(&self) -> Vec<String> {
        match self.metadata.get("requires") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Every string leaf under the nodes' `data`, with its node id
    pub fn data_strings(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for node in &self.nodes {
            for value in node.data.values() {
                collect_strings(value, &node.id, &mut out);
            }
        }
        out
    }
}

fn collect_strings<'a>(value: &'a Value, node: &'a str, out: &mut Vec<(&'a str, &'a str)>) {
    match value {
        Value::String(s) => out.push((node, s.as_str())),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, node, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, node, out)),
        _ => {}
    }
}

/// Apply `f` to every string leaf of `value`, depth-first
pub(crate) fn rewrite_strings<E>(
    value: &mut Value,
    f: &mut dyn FnMut(&str) -> Result<Option<String>, E>,
) -> Result<(), E> {
    match value {
        Value::String(s) => {
            if let Some(replaced) = f(s)? {
                *s = replaced;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strings(item, f)?;
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                rewrite_strings(item, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Infallible form of [`rewrite_strings`]
pub(crate) fn replace_strings(value: &mut Value, f: &mut dyn FnMut(&str) -> Option<String>) {
    if let Err(never) = rewrite_strings::<Infallible>(value, &mut |s: &str| Ok(f(s))) {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shape() {
        let path = Path::new("bas/registry.json");
        let ok = Registry::parse(r#"{"version":"1.0.0","playbooks":[]}"#, path).unwrap();
        assert!(ok.is_empty());

        assert!(Registry::parse(r#"{"playbooks":[]}"#, path).is_err());
        assert!(Registry::parse(r#"{"version":"1.0.0","playbooks":{}}"#, path).is_err());
        assert!(Registry::parse(r#"[]"#, path).is_err());
        assert!(Registry::parse(r#"{"version":"1","playbooks":[{"file":""}]}"#, path).is_err());
    }

    #[test]
    fn test_entry_name_and_slug() {
        let entry = RegistryEntry {
            file: "bas/cases/smoke/nav.json".to_string(),
            ..Default::default()
        };
        assert_eq!(entry.name(), "nav");
        assert_eq!(entry.slug(), "smoke-nav");
    }

    #[test]
    fn test_node_extra_fields_survive() {
        let raw = r#"{
            "nodes": [{"id": "a", "type": "navigate", "data": {"url": "x"}, "position": {"x": 1, "y": 2}}],
            "edges": [],
            "metadata": {"fixture_id": "login", "requires": ["har"]}
        }"#;
        let wf = WorkflowDefinition::parse(raw, Path::new("wf.json")).unwrap();
        assert_eq!(wf.fixture_id(), Some("login"));
        assert_eq!(wf.required_capabilities(), vec!["har".to_string()]);

        let back = serde_json::to_value(&wf).unwrap();
        assert_eq!(back["nodes"][0]["position"]["y"], 2);
    }
}
