//! Converter properties over the common action types

use chrono::Utc;
use serde_json::{json, Value};
use test_case::test_case;

use basrun_engine::converter::WorkerStepResult;
use basrun_engine::outcome::{FailureKind, FailureSource};
use basrun_engine::{CompiledInstruction, Converter, DefaultConverter, StepOutcome, WorkerRunResponse};

/// The worker's echo of an instruction it ran
fn echo(instruction: &CompiledInstruction, success: bool, error: Option<&str>) -> WorkerRunResponse {
    let wire = DefaultConverter.to_worker(instruction).unwrap();
    WorkerRunResponse {
        schema_version: None,
        payload_version: None,
        steps: vec![WorkerStepResult {
            index: wire.index,
            node_id: wire.node_id.clone(),
            step_type: wire.action.action_type().to_string(),
            success,
            error: error.map(str::to_string),
            ..Default::default()
        }],
    }
}

fn convert(instruction: &CompiledInstruction, response: &WorkerRunResponse) -> StepOutcome {
    DefaultConverter.from_worker_step("exec-1", instruction, Utc::now(), response)
}

#[test_case("navigate", json!({"url": "http://localhost:8080/"}) ; "navigate")]
#[test_case("click", json!({"selector": "#submit"}) ; "click")]
#[test_case("input", json!({"selector": "#email", "value": "a@b.c"}) ; "input")]
#[test_case("wait", json!({"duration_ms": 250}) ; "wait")]
#[test_case("assert", json!({"selector": "#ok", "mode": "visible"}) ; "assert")]
#[test_case("extract", json!({"selector": "h1"}) ; "extract")]
fn test_round_trip_preserves_identity(action: &str, params: Value) {
    let instruction = CompiledInstruction::new(3, "node-3", action, params);
    let outcome = convert(&instruction, &echo(&instruction, true, None));

    assert_eq!(outcome.step_index, 3);
    assert_eq!(outcome.node_id, "node-3");
    assert_eq!(outcome.step_type, action);
    assert!(outcome.success);
    assert!(outcome.failure.is_none());
}

#[test_case("element not found" ; "plain message")]
#[test_case("Timeout 30000ms exceeded" ; "timeout message")]
fn test_failed_step_carries_engine_failure(error: &str) {
    let instruction = CompiledInstruction::new(0, "press", "click", json!({"selector": "#go"}));
    let outcome = convert(&instruction, &echo(&instruction, false, Some(error)));

    assert!(!outcome.success);
    let failure = outcome.failure.expect("failure");
    assert_eq!(failure.kind, FailureKind::Engine);
    assert_eq!(failure.source, FailureSource::Engine);
    assert_eq!(failure.message, error);
}

#[test]
fn test_outcome_json_round_trip() {
    let instruction = CompiledInstruction::new(1, "check", "assert", json!({"selector": "#ok", "mode": "visible"}));
    let outcome = convert(&instruction, &echo(&instruction, false, Some("Element not visible")));

    let encoded = serde_json::to_string(&outcome).unwrap();
    let decoded: StepOutcome = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, outcome);

    let raw: Value = serde_json::from_str(&encoded).unwrap();
    assert!(raw["failure"].get("fatal").is_none());
}

#[test]
fn test_param_mismatch_is_rejected() {
    let instruction = CompiledInstruction::new(0, "open", "navigate", json!({"selector": "#wrong"}));
    assert!(DefaultConverter.to_worker(&instruction).is_err());
}
