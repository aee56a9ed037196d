//! Path scopes
//!
//! A scope is a set of paths relative to a scenario root. Agents working on
//! the same scenario may run concurrently only when their scopes do not
//! overlap.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected scope path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope path '{0}' is empty")]
    Empty(String),

    #[error("scope path '{0}' references the home directory")]
    HomeDirectory(String),

    #[error("scope path '{0}' escapes the scenario root")]
    Escapes(String),

    #[error("scope path '{0}' is outside the scenario root {1}")]
    OutsideRoot(String, String),
}

/// Result of comparing two scope sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConflict {
    pub has_conflict: bool,
    pub reason: String,
    /// Overlapping pairs, as `(left, right)`
    pub overlaps: Vec<(String, String)>,
}

impl ScopeConflict {
    fn clear() -> Self {
        Self {
            has_conflict: false,
            reason: "scopes are disjoint".to_string(),
            overlaps: Vec::new(),
        }
    }
}

/// Validate scope paths against a scenario root.
///
/// Returns each path normalized and relative to the root.
pub fn validate_scope_paths(root: &Path, paths: &[String]) -> Result<Vec<PathBuf>, ScopeError> {
    let root = normalize(root);
    let mut out = Vec::with_capacity(paths.len());

    for raw in paths {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::Empty(raw.clone()));
        }
        if trimmed.starts_with('~') || trimmed.contains("$HOME") {
            return Err(ScopeError::HomeDirectory(raw.clone()));
        }

        let candidate = Path::new(trimmed);
        let relative = if candidate.is_absolute() {
            let normalized = normalize(candidate);
            match normalized.strip_prefix(&root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    return Err(ScopeError::OutsideRoot(
                        raw.clone(),
                        root.display().to_string(),
                    ))
                }
            }
        } else {
            normalize_relative(candidate).ok_or_else(|| ScopeError::Escapes(raw.clone()))?
        };

        out.push(relative);
    }

    Ok(out)
}

/// Decide whether two scope sets overlap.
///
/// An empty set stands for the entire scenario and conflicts with anything.
/// Otherwise the sets conflict when a path in one is a component-wise prefix
/// of a path in the other, equality included.
pub fn classify_scope_conflict(a: &[String], b: &[String]) -> ScopeConflict {
    if a.is_empty() || b.is_empty() {
        return ScopeConflict {
            has_conflict: true,
            reason: "an empty scope covers the entire scenario".to_string(),
            overlaps: Vec::new(),
        };
    }

    let left: Vec<(String, PathBuf)> = a.iter().map(|p| (p.clone(), lexical(p))).collect();
    let right: Vec<(String, PathBuf)> = b.iter().map(|p| (p.clone(), lexical(p))).collect();

    let mut overlaps = Vec::new();
    for (raw_a, path_a) in &left {
        for (raw_b, path_b) in &right {
            if path_a.starts_with(path_b) || path_b.starts_with(path_a) {
                overlaps.push((raw_a.clone(), raw_b.clone()));
            }
        }
    }

    if overlaps.is_empty() {
        return ScopeConflict::clear();
    }

    let reason = overlaps
        .iter()
        .map(|(x, y)| format!("'{}' overlaps '{}'", x, y))
        .collect::<Vec<_>>()
        .join(", ");

    ScopeConflict {
        has_conflict: true,
        reason,
        overlaps,
    }
}

/// Lexical normalization for comparison; `..` is kept as a literal component
fn lexical(raw: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(raw.trim()).components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Normalize a relative path, returning `None` when it climbs above its base
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_empty_scope_always_conflicts() {
        let result = classify_scope_conflict(&[], &set(&["ui/src"]));
        assert!(result.has_conflict);

        let result = classify_scope_conflict(&set(&["api"]), &[]);
        assert!(result.has_conflict);
    }

    #[test]
    fn test_disjoint_scopes() {
        let result = classify_scope_conflict(&set(&["api/handlers", "docs"]), &set(&["ui/src"]));
        assert!(!result.has_conflict);
        assert!(result.overlaps.is_empty());
    }

    #[test]
    fn test_prefix_is_component_wise() {
        // "ui/src" is not a prefix of "ui/srcs"
        let result = classify_scope_conflict(&set(&["ui/src"]), &set(&["ui/srcs/app.ts"]));
        assert!(!result.has_conflict);

        let result = classify_scope_conflict(&set(&["ui/src"]), &set(&["./ui/src/app.ts"]));
        assert!(result.has_conflict);
        assert_eq!(
            result.overlaps,
            vec![("ui/src".to_string(), "./ui/src/app.ts".to_string())]
        );
    }

    #[test]
    fn test_equal_paths_conflict() {
        let result = classify_scope_conflict(&set(&["api/"]), &set(&["api"]));
        assert!(result.has_conflict);
    }

    #[test]
    fn test_validate_rejects_escape_and_home() {
        let root = Path::new("/srv/scenario");
        assert_eq!(
            validate_scope_paths(root, &set(&["../other"])),
            Err(ScopeError::Escapes("../other".to_string()))
        );
        assert_eq!(
            validate_scope_paths(root, &set(&["~/notes"])),
            Err(ScopeError::HomeDirectory("~/notes".to_string()))
        );
        assert!(matches!(
            validate_scope_paths(root, &set(&["/etc/passwd"])),
            Err(ScopeError::OutsideRoot(_, _))
        ));
    }

    #[test]
    fn test_validate_normalizes() {
        let root = Path::new("/srv/scenario");
        let paths = validate_scope_paths(
            root,
            &set(&["./ui/src/../src/app", "/srv/scenario/api", "a/b/.."]),
        )
        .unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("ui/src/app"),
                PathBuf::from("api"),
                PathBuf::from("a"),
            ]
        );
    }
}
