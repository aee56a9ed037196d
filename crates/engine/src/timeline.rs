//! Execution timelines and their summaries

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::outcome::AssertionOutcome;

/// Screenshot reference inside a timeline frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameScreenshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineFrame {
    #[serde(default, alias = "index")]
    pub step_index: u32,
    #[serde(default)]
    pub node_id: String,
    #[serde(default, alias = "type")]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<FrameScreenshot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TimelineFrame {
    pub fn failed(&self) -> bool {
        self.success == Some(false)
            || matches!(
                self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
                Some("failed") | Some("error")
            )
    }

    pub fn is_assertion(&self) -> bool {
        self.assertion.is_some() || self.step_type == "assert"
    }

    fn failure_message(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| self.assertion.as_ref().and_then(|a| a.message.clone()))
            .unwrap_or_else(|| "step failed".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, alias = "steps")]
    pub frames: Vec<TimelineFrame>,
}

impl Timeline {
    /// Parse a timeline document; an empty body is an empty timeline
    pub fn parse(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let mut timeline: Timeline = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Protocol(format!("timeline: {}", e)))?;
        timeline.frames.sort_by_key(|f| f.step_index);
        Ok(timeline)
    }

    pub fn summarize(&self) -> TimelineSummary {
        let mut summary = TimelineSummary {
            total_steps: self.frames.len(),
            ..Default::default()
        };

        for frame in &self.frames {
            let kind = if frame.step_type.is_empty() { "unknown" } else { frame.step_type.as_str() };
            *summary.steps_by_type.entry(kind.to_string()).or_insert(0) += 1;
            summary.duration_ms += frame.duration_ms.unwrap_or(0);

            let failed = frame.failed();
            if failed {
                summary.failed_steps += 1;
                if summary.first_failure.is_none() {
                    summary.first_failure = Some(FirstFailure {
                        step_index: frame.step_index,
                        node_id: frame.node_id.clone(),
                        step_type: frame.step_type.clone(),
                        message: frame.failure_message(),
                    });
                }
            } else {
                summary.passed_steps += 1;
            }

            if frame.is_assertion() {
                summary.assertions.total += 1;
                let passed = frame.assertion.as_ref().map(|a| a.success && !failed).unwrap_or(!failed);
                if passed {
                    summary.assertions.passed += 1;
                } else {
                    summary.assertions.failed += 1;
                }
            }
        }

        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionTally {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstFailure {
    pub step_index: u32,
    pub node_id: String,
    pub step_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub total_steps: usize,
    pub steps_by_type: BTreeMap<String, usize>,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub assertions: AssertionTally,
    pub first_failure: Option<FirstFailure>,
    pub duration_ms: u64,
}

impl TimelineSummary {
    pub fn has_failures(&self) -> bool {
        self.failed_steps > 0
    }
}
