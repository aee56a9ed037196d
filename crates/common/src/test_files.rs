//! Test file quality scoring
//!
//! A code test file earns one point each for: at least 20 non-comment lines,
//! any assertion, any test function, at least three test functions, and an
//! assertion density of at least 0.1 per line. A file scoring 4 or more is
//! meaningful. Playbook files are judged structurally instead.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::scope::normalize_relative;

/// Score at or above which a test counts as meaningful
pub const MEANINGFUL_SCORE: u8 = 4;
pub const MIN_LOC: usize = 20;
pub const MIN_TEST_FUNCTIONS: usize = 3;
pub const MIN_ASSERTION_DENSITY: f64 = 0.1;
pub const MIN_PLAYBOOK_BYTES: u64 = 100;

static ASSERTION_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"\b(?:assert(?:\.\w+|_\w+)?!?|expect|require\.\w+|t\.(?:Errorf?|Fatalf?|Fail(?:Now)?))\s*\(",
    )
    .ok()
});

static TEST_FUNCTION_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^\s*func\s+Test\w*\s*\(|\b(?:it|test)(?:\.\w+)?\s*\(\s*['"`]|^\s*def\s+test_\w+|#\[(?:tokio::)?test\]"#,
    )
    .ok()
});

/// Measured quality of one referenced test file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFileQuality {
    pub path: String,
    pub exists: bool,
    pub loc: usize,
    pub assertions: usize,
    pub test_functions: usize,
    pub assertion_density: f64,
    pub score: u8,
    pub meaningful: bool,
    pub problems: Vec<String>,
}

impl TestFileQuality {
    fn missing(path: &str, problem: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            exists: false,
            loc: 0,
            assertions: 0,
            test_functions: 0,
            assertion_density: 0.0,
            score: 0,
            meaningful: false,
            problems: vec![problem.into()],
        }
    }
}

/// Assess a file referenced relative to the scenario root
pub fn assess_reference(scenario_root: &Path, reference: &str) -> TestFileQuality {
    let reference = reference.trim();
    let Some(relative) = normalize_relative(Path::new(reference)) else {
        return TestFileQuality::missing(reference, "reference escapes the scenario root");
    };
    let path = scenario_root.join(relative);

    let is_playbook = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    );

    if is_playbook {
        assess_playbook(&path, reference)
    } else {
        match std::fs::read_to_string(&path) {
            Ok(content) => assess_source(reference, &content),
            Err(_) => TestFileQuality::missing(reference, "file not found"),
        }
    }
}

/// Score test source code
pub fn assess_source(path: &str, content: &str) -> TestFileQuality {
    let loc = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_comment(line))
        .count();
    let assertions = count_matches(&ASSERTION_PATTERN, content);
    let test_functions = count_matches(&TEST_FUNCTION_PATTERN, content);
    let assertion_density = if loc == 0 {
        0.0
    } else {
        assertions as f64 / loc as f64
    };

    let mut score = 0u8;
    let mut problems = Vec::new();

    if loc >= MIN_LOC {
        score += 1;
    } else {
        problems.push(format!("only {} lines of code", loc));
    }
    if assertions > 0 {
        score += 1;
    } else {
        problems.push("no assertions".to_string());
    }
    if test_functions > 0 {
        score += 1;
    } else {
        problems.push("no test functions".to_string());
    }
    if test_functions >= MIN_TEST_FUNCTIONS {
        score += 1;
    } else if test_functions > 0 {
        problems.push(format!("only {} test functions", test_functions));
    }
    if assertion_density >= MIN_ASSERTION_DENSITY {
        score += 1;
    } else {
        problems.push(format!("assertion density {:.2}", assertion_density));
    }

    TestFileQuality {
        path: path.to_string(),
        exists: true,
        loc,
        assertions,
        test_functions,
        assertion_density,
        score,
        meaningful: score >= MEANINGFUL_SCORE,
        problems,
    }
}

/// Judge a playbook: parseable, has typed nodes or steps, at least 100 bytes
fn assess_playbook(path: &Path, reference: &str) -> TestFileQuality {
    let Ok(content) = std::fs::read_to_string(path) else {
        return TestFileQuality::missing(reference, "file not found");
    };

    let mut problems = Vec::new();
    if (content.len() as u64) < MIN_PLAYBOOK_BYTES {
        problems.push(format!("only {} bytes", content.len()));
    }

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let parsed: Option<serde_json::Value> = if is_yaml {
        serde_yaml::from_str(&content).ok()
    } else {
        serde_json::from_str(&content).ok()
    };

    let mut steps = 0;
    match parsed {
        None => problems.push("does not parse".to_string()),
        Some(doc) => {
            steps = count_typed(&doc, "nodes", &["type", "action"])
                + count_typed(&doc, "steps", &["action", "type"]);
            if steps == 0 {
                problems.push("no typed nodes or steps".to_string());
            }
        }
    }

    let meaningful = problems.is_empty();
    TestFileQuality {
        path: reference.to_string(),
        exists: true,
        loc: content.lines().filter(|l| !l.trim().is_empty()).count(),
        assertions: 0,
        test_functions: steps,
        assertion_density: 0.0,
        score: if meaningful { 5 } else { 0 },
        meaningful,
        problems,
    }
}

fn count_typed(doc: &serde_json::Value, key: &str, type_keys: &[&str]) -> usize {
    doc.get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| type_keys.iter().any(|k| item.get(k).is_some()))
                .count()
        })
        .unwrap_or(0)
}

fn count_matches(pattern: &Lazy<Option<Regex>>, content: &str) -> usize {
    pattern
        .as_ref()
        .map(|re| re.find_iter(content).count())
        .unwrap_or(0)
}

fn is_comment(line: &str) -> bool {
    line.starts_with("//")
        || (line.starts_with('#') && !line.starts_with("#["))
        || line.starts_with("/*")
        || line.starts_with('*')
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_GO: &str = r#"
package handlers

import "testing"

// TestCreate checks creation
func TestCreate(t *testing.T) {
    got := create("a")
    if got == nil {
        t.Fatal("nil")
    }
    assert.Equal(t, "a", got.Name)
}

func TestUpdate(t *testing.T) {
    got := update("b")
    assert.Equal(t, "b", got.Name)
    assert.NotNil(t, got)
}

func TestDelete(t *testing.T) {
    err := remove("c")
    assert.NoError(t, err)
    if err != nil {
        t.Errorf("unexpected %v", err)
    }
}
"#;

    #[test]
    fn test_good_go_file_is_meaningful() {
        let quality = assess_source("api/handlers/h_test.go", GOOD_GO);
        assert_eq!(quality.test_functions, 3);
        assert!(quality.assertions >= 6);
        assert!(quality.loc >= MIN_LOC);
        assert_eq!(quality.score, 5);
        assert!(quality.meaningful);
    }

    #[test]
    fn test_stub_file_is_superficial() {
        let quality = assess_source(
            "ui/src/a.test.ts",
            "// placeholder\ntest('renders', () => {})\n",
        );
        assert_eq!(quality.loc, 1);
        assert_eq!(quality.test_functions, 1);
        assert_eq!(quality.assertions, 0);
        assert!(!quality.meaningful);
        assert!(quality.problems.contains(&"no assertions".to_string()));
    }

    #[test]
    fn test_playbook_structure() {
        let dir = tempfile::tempdir().unwrap();
        let playbooks = dir.path().join("test/playbooks");
        std::fs::create_dir_all(&playbooks).unwrap();

        std::fs::write(
            playbooks.join("ok.json"),
            r#"{"nodes":[{"id":"n1","type":"navigate","data":{"url":"${BASE_URL}/"}},{"id":"n2","type":"assert","data":{"selector":"h1"}}],"edges":[]}"#,
        )
        .unwrap();
        std::fs::write(playbooks.join("tiny.json"), r#"{"nodes":[]}"#).unwrap();

        let ok = assess_reference(dir.path(), "test/playbooks/ok.json");
        assert!(ok.meaningful, "{:?}", ok.problems);

        let tiny = assess_reference(dir.path(), "test/playbooks/tiny.json");
        assert!(!tiny.meaningful);
        assert_eq!(tiny.problems.len(), 2);

        let missing = assess_reference(dir.path(), "test/playbooks/none.json");
        assert!(!missing.exists);

        let escaping = assess_reference(dir.path(), "../outside.json");
        assert!(!escaping.exists);
    }
}
