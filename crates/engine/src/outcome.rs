//! Step outcomes and their JSON wire schema
//!
//! `StepOutcome` is the normalized result of one executed instruction. On the
//! wire it is a flat snake_case object; screenshot bytes travel as base64 and
//! keys this crate does not interpret are carried through untouched.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub const STEP_OUTCOME_SCHEMA_VERSION: &str = "automation-step-outcome-v1";
pub const STEP_OUTCOME_PAYLOAD_VERSION: &str = "1";
pub const DEFAULT_SCREENSHOT_MEDIA_TYPE: &str = "image/png";

// ============================================================================
// Failure
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Engine,
    Infra,
    Orchestration,
    User,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Engine => "engine",
            FailureKind::Infra => "infra",
            FailureKind::Orchestration => "orchestration",
            FailureKind::User => "user",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    #[default]
    Engine,
    Infra,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Failure embedded in an unsuccessful outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    /// Absent on the wire means false
    #[serde(default, skip_serializing_if = "is_false")]
    pub fatal: bool,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub source: FailureSource,
}

impl StepFailure {
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            fatal: false,
            retryable: false,
            occurred_at: Some(Utc::now()),
            details: Map::new(),
            source: FailureSource::Engine,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn with_source(mut self, source: FailureSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Telemetry records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FocusedElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HighlightRegion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaskRegion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub point: Point,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssertionOutcome {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub negated: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionOutcome {
    #[serde(rename = "type", default)]
    pub condition_type: String,
    #[serde(default)]
    pub outcome: bool,
    #[serde(default)]
    pub negated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Decoded screenshot
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub data: Vec<u8>,
    pub media_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data,
            media_type: DEFAULT_SCREENSHOT_MEDIA_TYPE.to_string(),
            width: None,
            height: None,
            captured_at: Utc::now(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomSnapshot {
    pub html: String,
    pub preview: Option<String>,
    pub collected_at: DateTime<Utc>,
}

// ============================================================================
// StepOutcome
// ============================================================================

/// Normalized result of one executed instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StepOutcomeWire", try_from = "StepOutcomeWire")]
pub struct StepOutcome {
    pub schema_version: String,
    pub payload_version: String,
    pub execution_id: String,
    pub correlation_id: Option<String>,
    pub step_index: u32,
    pub attempt: u32,
    pub node_id: String,
    pub step_type: String,
    pub instruction: Option<Value>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub final_url: Option<String>,
    pub failure: Option<StepFailure>,
    pub extracted_data: Map<String, Value>,
    pub assertion: Option<AssertionOutcome>,
    pub condition: Option<ConditionOutcome>,
    pub element_bounding_box: Option<BoundingBox>,
    pub click_position: Option<Point>,
    pub focused_element: Option<FocusedElement>,
    pub highlight_regions: Vec<HighlightRegion>,
    pub mask_regions: Vec<MaskRegion>,
    pub zoom_factor: Option<f64>,
    pub cursor_trail: Vec<CursorPosition>,
    pub console_logs: Vec<ConsoleLogEntry>,
    pub network_events: Vec<NetworkEvent>,
    pub dom_snapshot: Option<DomSnapshot>,
    pub screenshot: Option<Screenshot>,
    pub notes: BTreeMap<String, String>,
    /// Wire keys not interpreted here, re-emitted on encode
    pub extra: Map<String, Value>,
}

impl StepOutcome {
    /// A successful outcome with no telemetry
    pub fn new(
        execution_id: impl Into<String>,
        step_index: u32,
        node_id: impl Into<String>,
        step_type: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: STEP_OUTCOME_SCHEMA_VERSION.to_string(),
            payload_version: STEP_OUTCOME_PAYLOAD_VERSION.to_string(),
            execution_id: execution_id.into(),
            correlation_id: None,
            step_index,
            attempt: 1,
            node_id: node_id.into(),
            step_type: step_type.into(),
            instruction: None,
            success: true,
            started_at,
            completed_at: None,
            duration_ms: 0,
            final_url: None,
            failure: None,
            extracted_data: Map::new(),
            assertion: None,
            condition: None,
            element_bounding_box: None,
            click_position: None,
            focused_element: None,
            highlight_regions: Vec::new(),
            mask_regions: Vec::new(),
            zoom_factor: None,
            cursor_trail: Vec::new(),
            console_logs: Vec::new(),
            network_events: Vec::new(),
            dom_snapshot: None,
            screenshot: None,
            notes: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Mark the outcome failed
    pub fn fail(mut self, failure: StepFailure) -> Self {
        self.success = false;
        self.failure = Some(failure);
        self
    }

    /// Exactly one of success or failure holds
    pub fn is_consistent(&self) -> bool {
        self.success == self.failure.is_none()
    }

    /// Describe a version mismatch against the constants, if any
    pub fn version_mismatch(&self) -> Option<String> {
        version_mismatch(Some(&self.schema_version), Some(&self.payload_version))
    }
}

/// Compare declared versions with the constants; absent versions are accepted
pub fn version_mismatch(schema: Option<&str>, payload: Option<&str>) -> Option<String> {
    let mut problems = Vec::new();
    if let Some(schema) = schema.filter(|s| *s != STEP_OUTCOME_SCHEMA_VERSION) {
        problems.push(format!(
            "schema_version '{}' (expected '{}')",
            schema, STEP_OUTCOME_SCHEMA_VERSION
        ));
    }
    if let Some(payload) = payload.filter(|p| *p != STEP_OUTCOME_PAYLOAD_VERSION) {
        problems.push(format!(
            "payload_version '{}' (expected '{}')",
            payload, STEP_OUTCOME_PAYLOAD_VERSION
        ));
    }
    (!problems.is_empty()).then(|| problems.join(", "))
}

// ============================================================================
// Wire form
// ============================================================================

fn default_attempt() -> u32 {
    1
}

#[derive(Serialize, Deserialize)]
struct StepOutcomeWire {
    #[serde(default)]
    schema_version: String,
    #[serde(default)]
    payload_version: String,
    #[serde(default)]
    execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default)]
    step_index: u32,
    #[serde(default = "default_attempt")]
    attempt: u32,
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instruction: Option<Value>,
    #[serde(default)]
    success: bool,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<StepFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screenshot_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screenshot_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screenshot_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screenshot_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    screenshot_captured_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dom_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dom_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dom_collected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    console_logs: Vec<ConsoleLogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    network: Vec<NetworkEvent>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extracted_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assertion: Option<AssertionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<ConditionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element_bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    click_position: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    focused_element: Option<FocusedElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    highlight_regions: Vec<HighlightRegion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mask_regions: Vec<MaskRegion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    zoom_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    cursor_trail: Vec<CursorPosition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    notes: BTreeMap<String, String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<StepOutcome> for StepOutcomeWire {
    fn from(outcome: StepOutcome) -> Self {
        let (screenshot_base64, screenshot_media_type, screenshot_width, screenshot_height, screenshot_captured_at) =
            match outcome.screenshot {
                Some(shot) => (
                    Some(STANDARD.encode(&shot.data)),
                    Some(shot.media_type),
                    shot.width,
                    shot.height,
                    Some(shot.captured_at),
                ),
                None => (None, None, None, None, None),
            };
        let (dom_html, dom_preview, dom_collected_at) = match outcome.dom_snapshot {
            Some(dom) => (Some(dom.html), dom.preview, Some(dom.collected_at)),
            None => (None, None, None),
        };

        Self {
            schema_version: outcome.schema_version,
            payload_version: outcome.payload_version,
            execution_id: outcome.execution_id,
            correlation_id: outcome.correlation_id,
            step_index: outcome.step_index,
            attempt: outcome.attempt,
            node_id: outcome.node_id,
            step_type: outcome.step_type,
            instruction: outcome.instruction,
            success: outcome.success,
            started_at: outcome.started_at,
            completed_at: outcome.completed_at,
            duration_ms: outcome.duration_ms,
            final_url: outcome.final_url,
            failure: outcome.failure,
            screenshot_base64,
            screenshot_media_type,
            screenshot_width,
            screenshot_height,
            screenshot_captured_at,
            dom_html,
            dom_preview,
            dom_collected_at,
            console_logs: outcome.console_logs,
            network: outcome.network_events,
            extracted_data: outcome.extracted_data,
            assertion: outcome.assertion,
            condition: outcome.condition,
            element_bounding_box: outcome.element_bounding_box,
            click_position: outcome.click_position,
            focused_element: outcome.focused_element,
            highlight_regions: outcome.highlight_regions,
            mask_regions: outcome.mask_regions,
            zoom_factor: outcome.zoom_factor,
            cursor_trail: outcome.cursor_trail,
            notes: outcome.notes,
            extra: outcome.extra,
        }
    }
}

impl TryFrom<StepOutcomeWire> for StepOutcome {
    type Error = String;

    fn try_from(wire: StepOutcomeWire) -> Result<Self, Self::Error> {
        let fallback_time = wire.completed_at.unwrap_or(wire.started_at);

        let data = wire
            .screenshot_base64
            .filter(|encoded| !encoded.is_empty())
            .and_then(|encoded| match STANDARD.decode(encoded.as_bytes()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(node_id = %wire.node_id, "Dropping undecodable screenshot: {}", e);
                    None
                }
            });
        let screenshot = data.map(|data| Screenshot {
            data,
            media_type: wire
                .screenshot_media_type
                .unwrap_or_else(|| DEFAULT_SCREENSHOT_MEDIA_TYPE.to_string()),
            width: wire.screenshot_width,
            height: wire.screenshot_height,
            captured_at: wire.screenshot_captured_at.unwrap_or(fallback_time),
        });

        let dom_snapshot = wire.dom_html.map(|html| DomSnapshot {
            html,
            preview: wire.dom_preview,
            collected_at: wire.dom_collected_at.unwrap_or(fallback_time),
        });

        Ok(Self {
            schema_version: wire.schema_version,
            payload_version: wire.payload_version,
            execution_id: wire.execution_id,
            correlation_id: wire.correlation_id,
            step_index: wire.step_index,
            attempt: wire.attempt.max(1),
            node_id: wire.node_id,
            step_type: wire.step_type,
            instruction: wire.instruction,
            success: wire.success,
            started_at: wire.started_at,
            completed_at: wire.completed_at,
            duration_ms: wire.duration_ms,
            final_url: wire.final_url,
            failure: wire.failure,
            extracted_data: wire.extracted_data,
            assertion: wire.assertion,
            condition: wire.condition,
            element_bounding_box: wire.element_bounding_box,
            click_position: wire.click_position,
            focused_element: wire.focused_element,
            highlight_regions: wire.highlight_regions,
            mask_regions: wire.mask_regions,
            zoom_factor: wire.zoom_factor,
            cursor_trail: wire.cursor_trail,
            console_logs: wire.console_logs,
            network_events: wire.network,
            dom_snapshot,
            screenshot,
            notes: wire.notes,
            extra: wire.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    fn full_outcome() -> StepOutcome {
        let mut outcome = StepOutcome::new("exec-1", 2, "check", "assert", at(1_700_000_000_000));
        outcome.correlation_id = Some("corr-9".to_string());
        outcome.completed_at = Some(at(1_700_000_000_250));
        outcome.duration_ms = 250;
        outcome.final_url = Some("http://localhost:8080/".to_string());
        outcome.extracted_data.insert("value".to_string(), json!(["a", "b"]));
        outcome.assertion = Some(AssertionOutcome {
            mode: "visible".to_string(),
            selector: "#header".to_string(),
            expected: Some(json!(true)),
            actual: Some(json!(false)),
            success: false,
            negated: false,
            case_sensitive: true,
            message: Some("Element not visible".to_string()),
        });
        outcome.element_bounding_box = Some(BoundingBox { x: 1.5, y: 2.0, width: 30.0, height: 10.25 });
        outcome.click_position = Some(Point { x: 16.5, y: 7.0 });
        outcome.highlight_regions.push(HighlightRegion {
            selector: Some("#header".to_string()),
            ..Default::default()
        });
        outcome.mask_regions.push(MaskRegion {
            selector: Some(".secret".to_string()),
            bounding_box: None,
            opacity: Some(0.4),
        });
        outcome.zoom_factor = Some(1.25);
        outcome.cursor_trail.push(CursorPosition {
            point: Point { x: 1.0, y: 2.0 },
            recorded_at: at(1_700_000_000_100),
            elapsed_ms: 100,
        });
        outcome.console_logs.push(ConsoleLogEntry {
            kind: "error".to_string(),
            text: "boom".to_string(),
            timestamp: at(1_700_000_000_010),
            location: None,
        });
        outcome.network_events.push(NetworkEvent {
            kind: "response".to_string(),
            url: "http://localhost:8080/api".to_string(),
            method: Some("GET".to_string()),
            status: Some(500),
            ok: Some(false),
            resource_type: Some("fetch".to_string()),
            failure: None,
            timestamp: at(1_700_000_000_020),
            size: Some(12),
        });
        outcome.dom_snapshot = Some(DomSnapshot {
            html: "<main></main>".to_string(),
            preview: None,
            collected_at: at(1_700_000_000_200),
        });
        let mut shot = Screenshot::png(vec![0x89, b'P', b'N', b'G']);
        shot.captured_at = at(1_700_000_000_240);
        outcome.screenshot = Some(shot);
        outcome.notes.insert("reviewer".to_string(), "ci".to_string());
        outcome.fail(
            StepFailure::new(FailureKind::Engine, "step_failed", "Element not visible").retryable(),
        )
    }

    #[test]
    fn test_json_round_trip_preserves_fields() {
        let outcome = full_outcome();
        let json = serde_json::to_string(&outcome).unwrap();
        let back: StepOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_wire_keys() {
        let value = serde_json::to_value(full_outcome()).unwrap();
        assert_eq!(value["schema_version"], STEP_OUTCOME_SCHEMA_VERSION);
        assert_eq!(value["payload_version"], STEP_OUTCOME_PAYLOAD_VERSION);
        assert_eq!(value["screenshot_base64"], "iVBORw==");
        assert_eq!(value["screenshot_media_type"], "image/png");
        assert_eq!(value["network"][0]["status"], 500);
        assert_eq!(value["dom_html"], "<main></main>");
        // fatal=false is elided
        assert!(value["failure"].get("fatal").is_none());
    }

    #[test]
    fn test_invalid_screenshot_base64_drops_screenshot() {
        let mut value = serde_json::to_value(full_outcome()).unwrap();
        value["screenshot_base64"] = json!("!!!not-base64");

        let outcome: StepOutcome = serde_json::from_value(value).unwrap();
        assert!(outcome.screenshot.is_none());
        assert_eq!(outcome.dom_snapshot, full_outcome().dom_snapshot);
        assert!(!outcome.success);
    }

    #[test]
    fn test_missing_fatal_is_false() {
        let value = json!({
            "schema_version": STEP_OUTCOME_SCHEMA_VERSION,
            "payload_version": "1",
            "execution_id": "e",
            "step_index": 0,
            "node_id": "n",
            "step_type": "click",
            "success": false,
            "started_at": "2024-01-01T00:00:00Z",
            "failure": {"kind": "timeout", "code": "t", "message": "slow", "source": "infra"}
        });
        let outcome: StepOutcome = serde_json::from_value(value).unwrap();
        let failure = outcome.failure.unwrap();
        assert!(!failure.fatal);
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.source, FailureSource::Infra);
        assert_eq!(outcome.attempt, 1);
    }

    #[test]
    fn test_unknown_keys_round_trip() {
        let value = json!({
            "execution_id": "e",
            "started_at": "2024-01-01T00:00:00Z",
            "success": true,
            "trace_id": "abc",
            "vendor": {"browser": "chromium"}
        });
        let outcome: StepOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(outcome.extra["trace_id"], "abc");

        let again = serde_json::to_value(&outcome).unwrap();
        assert_eq!(again["vendor"]["browser"], "chromium");
    }

    #[test]
    fn test_version_mismatch() {
        assert!(version_mismatch(None, None).is_none());
        assert!(version_mismatch(Some(STEP_OUTCOME_SCHEMA_VERSION), Some("1")).is_none());
        let msg = version_mismatch(Some("automation-step-outcome-v2"), Some("1")).unwrap();
        assert!(msg.contains("v2"));
    }
}
