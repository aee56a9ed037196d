//! Instruction converter
//!
//! Translates compiled instructions into the worker's typed wire form, and
//! worker step batches back into normalized [`StepOutcome`]s.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ConversionError;
use crate::instruction::{CompiledInstruction, WorkerAction, WorkerInstruction};
use crate::outcome::{
    version_mismatch, AssertionOutcome, BoundingBox, ConditionOutcome, ConsoleLogEntry,
    CursorPosition, DomSnapshot, FailureKind, FailureSource, FocusedElement, HighlightRegion,
    MaskRegion, NetworkEvent, Point, Screenshot, StepFailure, StepOutcome,
};

pub const NO_STEP_RESULT: &str = "no step result returned";

// ============================================================================
// Worker response
// ============================================================================

/// Body of a `/session/{id}/run` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerRunResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_version: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkerStepResult>,
}

/// One executed step as the worker reports it; timestamps are epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerStepResult {
    pub index: u32,
    pub node_id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub success: bool,
    pub duration_ms: u64,
    pub final_url: Option<String>,
    pub error: Option<String>,
    pub extracted_data: Option<Value>,
    pub screenshot: Option<String>,
    pub dom_snapshot: Option<String>,
    pub assertion: Option<AssertionOutcome>,
    pub condition: Option<ConditionOutcome>,
    pub bounding_box: Option<BoundingBox>,
    pub click_position: Option<Point>,
    pub focused_element: Option<FocusedElement>,
    pub highlight_regions: Vec<HighlightRegion>,
    pub mask_regions: Vec<MaskRegion>,
    pub zoom_factor: Option<f64>,
    pub cursor_trail: Vec<WorkerCursorPoint>,
    pub console_logs: Vec<WorkerConsoleLog>,
    pub network_events: Vec<WorkerNetworkEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCursorPoint {
    pub point: Point,
    pub timestamp: i64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConsoleLog {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub timestamp: i64,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerNetworkEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub method: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<u16>,
    pub ok: Option<bool>,
    pub failure: Option<String>,
    pub timestamp: i64,
    pub size: Option<u64>,
}

fn from_epoch_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ============================================================================
// Converter
// ============================================================================

/// Bidirectional normalization between compiled instructions and the worker
pub trait Converter: Send + Sync {
    fn to_worker(&self, instruction: &CompiledInstruction) -> Result<WorkerInstruction, ConversionError>;

    fn from_worker_step(
        &self,
        execution_id: &str,
        instruction: &CompiledInstruction,
        started_at: DateTime<Utc>,
        response: &WorkerRunResponse,
    ) -> StepOutcome;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl Converter for DefaultConverter {
    fn to_worker(&self, instruction: &CompiledInstruction) -> Result<WorkerInstruction, ConversionError> {
        let action = WorkerAction::from_parts(&instruction.action_type, &instruction.params)?;
        Ok(WorkerInstruction {
            index: instruction.index,
            node_id: instruction.node_id.clone(),
            action,
            preload_html: instruction.preload_html.clone(),
            context: (!instruction.context.is_empty()).then(|| instruction.context.clone()),
            metadata: (!instruction.metadata.is_empty()).then(|| instruction.metadata.clone()),
        })
    }

    fn from_worker_step(
        &self,
        execution_id: &str,
        instruction: &CompiledInstruction,
        started_at: DateTime<Utc>,
        response: &WorkerRunResponse,
    ) -> StepOutcome {
        let now = Utc::now();

        let Some(step) = response.steps.first() else {
            warn!(execution_id, node_id = %instruction.node_id, "Worker returned no steps");
            let mut outcome = StepOutcome::new(
                execution_id,
                instruction.index,
                instruction.node_id.clone(),
                instruction.action_type.clone(),
                started_at,
            );
            outcome.instruction = serde_json::to_value(instruction).ok();
            outcome.completed_at = Some(now);
            outcome.duration_ms = elapsed_ms(started_at, now);
            return outcome.fail(StepFailure::new(FailureKind::Engine, "no_step_result", NO_STEP_RESULT));
        };

        let mut outcome = StepOutcome::new(
            execution_id,
            step.index,
            step.node_id.clone(),
            step.step_type.clone(),
            started_at,
        );
        outcome.instruction = serde_json::to_value(instruction).ok();
        outcome.success = step.success;
        outcome.completed_at = Some(now);
        outcome.duration_ms = step.duration_ms;
        outcome.final_url = step.final_url.clone();

        if let Some(data) = &step.extracted_data {
            let mut map = Map::new();
            map.insert("value".to_string(), data.clone());
            outcome.extracted_data = map;
        }

        outcome.screenshot = step
            .screenshot
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|encoded| match STANDARD.decode(encoded.as_bytes()) {
                Ok(data) => {
                    let mut shot = Screenshot::png(data);
                    shot.captured_at = now;
                    Some(shot)
                }
                Err(e) => {
                    debug!(execution_id, node_id = %step.node_id, "Dropping undecodable screenshot: {}", e);
                    None
                }
            });

        outcome.dom_snapshot = step
            .dom_snapshot
            .as_ref()
            .filter(|html| !html.is_empty())
            .map(|html| DomSnapshot {
                html: html.clone(),
                preview: None,
                collected_at: now,
            });

        outcome.assertion = step.assertion.clone();
        outcome.condition = step.condition.clone();
        outcome.element_bounding_box = step.bounding_box;
        outcome.click_position = step.click_position;
        outcome.focused_element = step.focused_element.clone();
        outcome.highlight_regions = step.highlight_regions.clone();
        outcome.mask_regions = step.mask_regions.clone();
        outcome.zoom_factor = step.zoom_factor;

        outcome.cursor_trail = step
            .cursor_trail
            .iter()
            .map(|p| CursorPosition {
                point: p.point,
                recorded_at: from_epoch_ms(p.timestamp),
                elapsed_ms: p.elapsed_ms,
            })
            .collect();

        outcome.console_logs = step
            .console_logs
            .iter()
            .map(|log| ConsoleLogEntry {
                kind: log.kind.clone(),
                text: log.text.clone(),
                timestamp: from_epoch_ms(log.timestamp),
                location: log.location.clone(),
            })
            .collect();

        outcome.network_events = step
            .network_events
            .iter()
            .map(|event| NetworkEvent {
                kind: event.kind.clone(),
                url: event.url.clone(),
                method: event.method.clone(),
                status: event.status,
                ok: event.ok,
                resource_type: event.resource_type.clone(),
                failure: event.failure.clone(),
                timestamp: from_epoch_ms(event.timestamp),
                size: event.size,
            })
            .collect();

        if !step.success {
            let message = step
                .error
                .as_deref()
                .filter(|e| !e.is_empty())
                .unwrap_or("step failed without an error message");
            outcome.failure = Some(
                StepFailure::new(FailureKind::Engine, "step_failed", message)
                    .with_source(FailureSource::Engine)
                    .retryable(),
            );
        }

        if let Some(problem) = version_mismatch(
            response.schema_version.as_deref(),
            response.payload_version.as_deref(),
        ) {
            warn!(execution_id, "Worker outcome version mismatch: {}", problem);
            outcome.success = false;
            outcome.failure = Some(
                StepFailure::new(FailureKind::Orchestration, "schema_version_mismatch", problem)
                    .with_source(FailureSource::Infra),
            );
        }

        outcome
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
