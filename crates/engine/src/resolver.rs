//! Playbook resolver
//!
//! Loads the registry and turns authored workflows into fully resolved graphs.
//! Expansion order is fixed: `@selector/*` tokens first, then `@fixture/*`
//! subflows (whose own selectors are expanded before inlining), then
//! `${BASE_URL}` via [`apply_base_url`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use basrun_common::{validate_scope_paths, RunnerSettings};

use crate::error::ResolveError;
use crate::workflow::{
    replace_strings, rewrite_strings, Registry, RegistryEntry, ResolvedWorkflow, WorkflowDefinition, WorkflowEdge,
    WorkflowNode, REGISTRY_FILE,
};

pub const BASE_URL_TOKEN: &str = "${BASE_URL}";

static SELECTOR_TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"@selector/([A-Za-z0-9_.\-]+)").ok());

static FIXTURE_TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^@fixture/([A-Za-z0-9_.\-]+)$").ok());

static ANY_TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"@(selector|fixture)/[A-Za-z0-9_.\-]*").ok());

/// Separator between a fixture instance id and the fixture's own node id
pub const FIXTURE_ID_SEPARATOR: &str = "__";

/// Loads registries and resolves workflows
pub trait WorkflowResolver: Send + Sync {
    fn load_registry(&self) -> Result<Registry, ResolveError>;

    /// Read an entry's workflow as authored
    fn load_workflow(&self, entry: &RegistryEntry) -> Result<WorkflowDefinition, ResolveError>;

    /// Expand selector and fixture tokens
    fn resolve(&self, workflow: WorkflowDefinition, origin: &str) -> Result<ResolvedWorkflow, ResolveError>;

    fn resolve_entry(&self, entry: &RegistryEntry) -> Result<ResolvedWorkflow, ResolveError> {
        let workflow = self.load_workflow(entry)?;
        self.resolve(workflow, &entry.file)
    }
}

/// Resolver over a scenario directory
#[derive(Debug, Clone)]
pub struct FsPlaybookResolver {
    root: PathBuf,
    registry_dir: PathBuf,
    selector_manifest: PathBuf,
    fixtures_dir: PathBuf,
}

impl FsPlaybookResolver {
    pub fn new(root: impl Into<PathBuf>, settings: &RunnerSettings) -> Self {
        Self {
            root: root.into(),
            registry_dir: settings.registry_dir.clone(),
            selector_manifest: settings.selector_manifest.clone(),
            fixtures_dir: settings.fixtures_dir.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(&self.registry_dir).join(REGISTRY_FILE)
    }

    fn read(&self, path: &Path) -> Result<String, ResolveError> {
        std::fs::read_to_string(path).map_err(|source| ResolveError::Read {
            path: path.display().to_string(),
            source,
        })
    }

    /// Entry path relative to the root; absolute paths must lie inside it
    fn entry_path(&self, file: &str) -> Result<PathBuf, ResolveError> {
        let relative = validate_scope_paths(&self.root, &[file.to_string()])
            .map_err(|_| ResolveError::PathOutsideRoot(file.to_string()))?;
        relative
            .into_iter()
            .next()
            .map(|rel| self.root.join(rel))
            .ok_or_else(|| ResolveError::PathOutsideRoot(file.to_string()))
    }

    fn load_selectors(&self) -> Result<SelectorManifest, ResolveError> {
        let path = self.root.join(&self.selector_manifest);
        let raw = self.read(&path)?;
        SelectorManifest::parse(&raw, &path)
    }

    /// Fixture name -> file, keyed by `fixture_id` and by file stem
    fn fixture_index(&self) -> HashMap<String, PathBuf> {
        let mut index = HashMap::new();
        let dir = self.root.join(&self.fixtures_dir);
        if !dir.is_dir() {
            return index;
        }

        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
        {
            let path = entry.path().to_path_buf();
            if let Some(stem) = path.file_stem() {
                index
                    .entry(stem.to_string_lossy().into_owned())
                    .or_insert_with(|| path.clone());
            }
            let declared = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| WorkflowDefinition::parse(&raw, &path).ok())
                .and_then(|wf| wf.fixture_id().map(str::to_string));
            if let Some(id) = declared {
                index.insert(id, path);
            }
        }
        index
    }
}

impl WorkflowResolver for FsPlaybookResolver {
    fn load_registry(&self) -> Result<Registry, ResolveError> {
        let path = self.registry_path();
        let raw = self.read(&path)?;
        let registry = Registry::parse(&raw, &path)?;
        info!(
            "Loaded registry {} ({} playbook(s), version {})",
            path.display(),
            registry.playbooks.len(),
            registry.version
        );
        Ok(registry)
    }

    fn load_workflow(&self, entry: &RegistryEntry) -> Result<WorkflowDefinition, ResolveError> {
        let path = self.entry_path(&entry.file)?;
        let raw = self.read(&path)?;
        WorkflowDefinition::parse(&raw, &path)
    }

    fn resolve(&self, workflow: WorkflowDefinition, origin: &str) -> Result<ResolvedWorkflow, ResolveError> {
        let needs_selectors = workflow
            .data_strings()
            .iter()
            .any(|(_, s)| s.contains("@selector/"));
        let needs_fixtures = workflow
            .data_strings()
            .iter()
            .any(|(_, s)| s.contains("@fixture/"));

        let selectors = if needs_selectors || needs_fixtures {
            match self.load_selectors() {
                Ok(manifest) => manifest,
                Err(e) if needs_selectors => return Err(e),
                Err(_) => SelectorManifest::default(),
            }
        } else {
            SelectorManifest::default()
        };

        let mut expander = Expander {
            selectors: &selectors,
            fixtures: if needs_fixtures { self.fixture_index() } else { HashMap::new() },
            stack: Vec::new(),
        };

        let mut workflow = workflow;
        expander.expand_selectors(&mut workflow)?;
        let mut workflow = expander.expand_fixtures(workflow)?;
        ensure_no_tokens(&workflow)?;

        // resolver-only, removed by strip_resolver_fields
        workflow.metadata.entry("_resolved_from").or_insert_with(|| Value::String(origin.to_string()));

        debug!(
            "Resolved {} into {} node(s), {} edge(s)",
            origin,
            workflow.nodes.len(),
            workflow.edges.len()
        );
        Ok(workflow)
    }
}

// ============================================================================
// Selector manifest
// ============================================================================

/// `{"version": "...", "selectors": {"<name>": {"selector": "..."}}}`
#[derive(Debug, Clone, Default)]
pub struct SelectorManifest {
    selectors: Map<String, Value>,
}

impl SelectorManifest {
    pub fn parse(raw: &str, path: &Path) -> Result<Self, ResolveError> {
        let invalid = |reason: String| ResolveError::SelectorManifest {
            path: path.display().to_string(),
            reason,
        };
        let value: Value = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        match value.get("selectors") {
            Some(Value::Object(map)) => Ok(Self { selectors: map.clone() }),
            Some(_) => Err(invalid("'selectors' must be an object".to_string())),
            None => Err(invalid("missing 'selectors'".to_string())),
        }
    }

    /// Look up `<name>` as a flat key first, then as a dotted path
    pub fn lookup(&self, name: &str) -> Option<&str> {
        if let Some(found) = self.selectors.get(name).and_then(selector_of) {
            return Some(found);
        }

        let mut parts = name.split('.');
        let first = parts.next()?;
        let mut current = self.selectors.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        selector_of(current)
    }
}

fn selector_of(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.get("selector").and_then(Value::as_str),
        _ => None,
    }
}

// ============================================================================
// Expansion
// ============================================================================

struct Expander<'a> {
    selectors: &'a SelectorManifest,
    fixtures: HashMap<String, PathBuf>,
    stack: Vec<String>,
}

impl Expander<'_> {
    fn expand_selectors(&self, workflow: &mut WorkflowDefinition) -> Result<(), ResolveError> {
        let Some(re) = SELECTOR_TOKEN.as_ref() else {
            return Ok(());
        };

        for node in &mut workflow.nodes {
            let node_id = node.id.clone();
            for value in node.data.values_mut() {
                rewrite_strings(value, &mut |s: &str| {
                    if !s.contains("@selector/") {
                        return Ok(None);
                    }
                    let mut missing = None;
                    let replaced = re.replace_all(s, |caps: &regex::Captures<'_>| {
                        let name = &caps[1];
                        match self.selectors.lookup(name) {
                            Some(selector) => selector.to_string(),
                            None => {
                                missing.get_or_insert_with(|| name.to_string());
                                caps[0].to_string()
                            }
                        }
                    });
                    match missing {
                        Some(name) => Err(ResolveError::MissingSelector {
                            name,
                            node: node_id.clone(),
                        }),
                        None => Ok(Some(replaced.into_owned())),
                    }
                })?;
            }
        }
        Ok(())
    }

    fn expand_fixtures(&mut self, workflow: WorkflowDefinition) -> Result<WorkflowDefinition, ResolveError> {
        let WorkflowDefinition {
            nodes,
            edges,
            metadata,
        } = workflow;

        let mut out_nodes = Vec::with_capacity(nodes.len());
        let mut out_edges = edges;

        for node in nodes {
            let Some(fixture) = fixture_reference(&node) else {
                out_nodes.push(node);
                continue;
            };

            if self.stack.contains(&fixture) {
                return Err(ResolveError::FixtureCycle(fixture));
            }
            let path = self
                .fixtures
                .get(&fixture)
                .cloned()
                .ok_or_else(|| ResolveError::MissingFixture {
                    name: fixture.clone(),
                    node: node.id.clone(),
                })?;

            debug!("Inlining fixture '{}' at node {}", fixture, node.id);
            let raw = std::fs::read_to_string(&path).map_err(|source| ResolveError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let mut inner = WorkflowDefinition::parse(&raw, &path)?;
            if inner.nodes.is_empty() {
                return Err(ResolveError::Parse {
                    path: path.display().to_string(),
                    reason: format!("fixture '{}' has no nodes", fixture),
                });
            }

            apply_parameters(&mut inner, &node);
            self.expand_selectors(&mut inner)?;

            self.stack.push(fixture);
            let inner = self.expand_fixtures(inner)?;
            self.stack.pop();

            let (nodes, edges) = inline(&node.id, inner);
            rewire(&mut out_edges, &node.id, &nodes, &edges);
            out_nodes.extend(nodes);
            out_edges.extend(edges);
        }

        Ok(WorkflowDefinition {
            nodes: out_nodes,
            edges: out_edges,
            metadata,
        })
    }
}

/// Fixture name when one of the node's data values is exactly `@fixture/<name>`
fn fixture_reference(node: &WorkflowNode) -> Option<String> {
    let re = FIXTURE_TOKEN.as_ref()?;
    node.data.values().find_map(|value| {
        value
            .as_str()
            .and_then(|s| re.captures(s.trim()))
            .map(|caps| caps[1].to_string())
    })
}

/// Substitute `${name}` in the fixture with the subflow node's `parameters`
fn apply_parameters(fixture: &mut WorkflowDefinition, subflow: &WorkflowNode) {
    let Some(Value::Object(params)) = subflow.data.get("parameters") else {
        return;
    };
    let pairs: Vec<(String, String)> = params
        .iter()
        .filter(|(key, _)| key.as_str() != "BASE_URL")
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (format!("${{{}}}", key), text)
        })
        .collect();
    if pairs.is_empty() {
        return;
    }

    for node in &mut fixture.nodes {
        for value in node.data.values_mut() {
            replace_strings(value, &mut |s: &str| {
                let mut out = s.to_string();
                for (token, text) in &pairs {
                    out = out.replace(token.as_str(), text);
                }
                (out != s).then_some(out)
            });
        }
    }
}

fn prefixed(instance: &str, id: &str) -> String {
    format!("{}{}{}", instance, FIXTURE_ID_SEPARATOR, id)
}

/// Rename fixture nodes and edges under the instance id
fn inline(instance: &str, fixture: WorkflowDefinition) -> (Vec<WorkflowNode>, Vec<WorkflowEdge>) {
    let nodes = fixture
        .nodes
        .into_iter()
        .map(|mut node| {
            node.id = prefixed(instance, &node.id);
            node
        })
        .collect();

    let edges = fixture
        .edges
        .into_iter()
        .enumerate()
        .map(|(i, mut edge)| {
            let id = if edge.id.is_empty() { format!("e{}", i) } else { edge.id.clone() };
            edge.id = prefixed(instance, &id);
            edge.source = prefixed(instance, &edge.source);
            edge.target = prefixed(instance, &edge.target);
            edge
        })
        .collect();

    (nodes, edges)
}

/// Point outer edges at the inlined fixture's entry and exit nodes
fn rewire(outer: &mut Vec<WorkflowEdge>, instance: &str, nodes: &[WorkflowNode], edges: &[WorkflowEdge]) {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    let sources: HashSet<&str> = edges.iter().map(|e| e.source.as_str()).collect();
    let entries: Vec<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !targets.contains(id))
        .collect();
    let exits: Vec<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !sources.contains(id))
        .collect();

    let mut rewired = Vec::with_capacity(outer.len());
    for edge in outer.drain(..) {
        if edge.target == instance {
            for (n, entry) in entries.iter().enumerate() {
                let mut e = edge.clone();
                e.target = entry.to_string();
                if n > 0 {
                    e.id = format!("{}-{}", edge.id, n);
                }
                rewired.push(e);
            }
        } else if edge.source == instance {
            for (n, exit) in exits.iter().enumerate() {
                let mut e = edge.clone();
                e.source = exit.to_string();
                if n > 0 {
                    e.id = format!("{}-{}", edge.id, n);
                }
                rewired.push(e);
            }
        } else {
            rewired.push(edge);
        }
    }
    *outer = rewired;
}

fn ensure_no_tokens(workflow: &WorkflowDefinition) -> Result<(), ResolveError> {
    let Some(re) = ANY_TOKEN.as_ref() else {
        return Ok(());
    };
    for (node, text) in workflow.data_strings() {
        if let Some(found) = re.find(text) {
            return Err(ResolveError::UnresolvedToken {
                node: node.to_string(),
                token: found.as_str().to_string(),
            });
        }
    }
    Ok(())
}

/// Replace `${BASE_URL}` in node data. The URL's trailing `/` is dropped.
pub fn apply_base_url(workflow: &mut ResolvedWorkflow, base_url: Option<&str>) -> Result<(), ResolveError> {
    let uses_token = workflow
        .data_strings()
        .iter()
        .any(|(_, s)| s.contains(BASE_URL_TOKEN));
    if !uses_token {
        return Ok(());
    }

    let base = base_url
        .map(|u| u.trim().trim_end_matches('/'))
        .filter(|u| !u.is_empty())
        .ok_or(ResolveError::MissingBaseUrl)?;

    for node in &mut workflow.nodes {
        for value in node.data.values_mut() {
            rewrite_strings::<ResolveError>(value, &mut |s: &str| {
                Ok(s.contains(BASE_URL_TOKEN).then(|| s.replace(BASE_URL_TOKEN, base)))
            })?;
        }
    }
    Ok(())
}

/// Drop resolver-only metadata (keys starting with `_`)
pub fn strip_resolver_fields(workflow: &mut ResolvedWorkflow) {
    workflow.metadata.retain(|key, _| !key.starts_with('_'));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_lookup() {
        let manifest = SelectorManifest::parse(
            r#"{"version":"1.0.0","selectors":{
                "login.submit":{"selector":"[data-testid=submit]"},
                "nav":{"home":{"selector":"a.home"}}
            }}"#,
            Path::new("m.json"),
        )
        .unwrap();
        assert_eq!(manifest.lookup("login.submit"), Some("[data-testid=submit]"));
        assert_eq!(manifest.lookup("nav.home"), Some("a.home"));
        assert_eq!(manifest.lookup("nav"), None);
        assert_eq!(manifest.lookup("missing"), None);
    }

    #[test]
    fn test_base_url_substitution() {
        let mut wf: ResolvedWorkflow = serde_json::from_value(json!({
            "nodes": [{"id": "n", "type": "navigate", "data": {"url": "${BASE_URL}/settings"}}]
        }))
        .unwrap();
        apply_base_url(&mut wf, Some("http://localhost:8080/")).unwrap();
        assert_eq!(wf.nodes[0].data["url"], "http://localhost:8080/settings");
    }

    #[test]
    fn test_base_url_required_when_used() {
        let mut wf: ResolvedWorkflow = serde_json::from_value(json!({
            "nodes": [{"id": "n", "type": "navigate", "data": {"url": "${BASE_URL}/"}}]
        }))
        .unwrap();
        assert!(matches!(apply_base_url(&mut wf, None), Err(ResolveError::MissingBaseUrl)));

        let mut plain: ResolvedWorkflow = serde_json::from_value(json!({
            "nodes": [{"id": "n", "type": "navigate", "data": {"url": "https://example.com"}}]
        }))
        .unwrap();
        assert!(apply_base_url(&mut plain, None).is_ok());
    }

    #[test]
    fn test_strip_underscore_metadata() {
        let mut wf: ResolvedWorkflow = serde_json::from_value(json!({
            "nodes": [],
            "metadata": {"_resolved_from": "x", "_fixture_hash": "y", "name": "smoke"}
        }))
        .unwrap();
        strip_resolver_fields(&mut wf);
        assert_eq!(wf.metadata.len(), 1);
        assert!(wf.metadata.contains_key("name"));
    }

    #[test]
    fn test_fixture_parameters_substituted() {
        let mut fixture: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "email", "type": "input", "data": {"value": "${user}", "timeout_ms": "${wait}"}},
                {"id": "home", "type": "navigate", "data": {"url": "${BASE_URL}/${path}"}}
            ]
        }))
        .unwrap();
        let subflow: WorkflowNode = serde_json::from_value(json!({
            "id": "login",
            "type": "subflow",
            "data": {
                "workflow": "@fixture/login",
                "parameters": {"user": "qa@example.com", "wait": 500, "BASE_URL": "ignored"}
            }
        }))
        .unwrap();

        apply_parameters(&mut fixture, &subflow);

        assert_eq!(fixture.nodes[0].data["value"], "qa@example.com");
        assert_eq!(fixture.nodes[0].data["timeout_ms"], "500");
        assert_eq!(fixture.nodes[1].data["url"], "${BASE_URL}/${path}");
    }

    #[test]
    fn test_leftover_tokens_rejected() {
        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "n", "type": "click", "data": {"selector": "div @fixture/login"}}]
        }))
        .unwrap();
        assert!(matches!(
            ensure_no_tokens(&wf),
            Err(ResolveError::UnresolvedToken { ref node, .. }) if node == "n"
        ));
    }
}
