//! Compiled instructions and the worker's instruction wire form
//!
//! A compiled instruction carries its action as a string plus a free-form
//! params object. The worker form is a closed, typed union: each action has
//! its own params record and unknown params fields are rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConversionError;

/// An instruction produced by the resolver, consumed once per run call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub index: u32,
    pub node_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_html: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CompiledInstruction {
    pub fn new(index: u32, node_id: impl Into<String>, action_type: impl Into<String>, params: Value) -> Self {
        Self {
            index,
            node_id: node_id.into(),
            action_type: action_type.into(),
            params,
            preload_html: None,
            context: Map::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_preload_html(mut self, html: impl Into<String>) -> Self {
        self.preload_html = Some(html.into());
        self
    }
}

// ============================================================================
// Action parameters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigateParams {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickParams {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputParams {
    pub selector: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertParams {
    pub selector: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenshotParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionParams {
    pub condition_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubflowParams {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoverParams {
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrollParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyboardParams {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectParams {
    pub selector: String,
    pub value: String,
}

/// Closed set of worker actions, encoded as `type` + `params`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum WorkerAction {
    Navigate(NavigateParams),
    Click(ClickParams),
    Input(InputParams),
    Wait(WaitParams),
    Assert(AssertParams),
    Extract(ExtractParams),
    Screenshot(ScreenshotParams),
    Condition(ConditionParams),
    Subflow(SubflowParams),
    Hover(HoverParams),
    Scroll(ScrollParams),
    Keyboard(KeyboardParams),
    Select(SelectParams),
}

/// Action names accepted by [`WorkerAction`]
pub const ACTION_TYPES: &[&str] = &[
    "navigate", "click", "input", "wait", "assert", "extract", "screenshot", "condition",
    "subflow", "hover", "scroll", "keyboard", "select",
];

impl WorkerAction {
    /// Build an action from its name and a params object
    pub fn from_parts(action_type: &str, params: &Value) -> Result<Self, ConversionError> {
        if !ACTION_TYPES.contains(&action_type) {
            return Err(ConversionError::UnknownAction(action_type.to_string()));
        }
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        let tagged = serde_json::json!({ "type": action_type, "params": params });
        serde_json::from_value(tagged).map_err(|e| ConversionError::InvalidParams {
            action: action_type.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn action_type(&self) -> &'static str {
        match self {
            WorkerAction::Navigate(_) => "navigate",
            WorkerAction::Click(_) => "click",
            WorkerAction::Input(_) => "input",
            WorkerAction::Wait(_) => "wait",
            WorkerAction::Assert(_) => "assert",
            WorkerAction::Extract(_) => "extract",
            WorkerAction::Screenshot(_) => "screenshot",
            WorkerAction::Condition(_) => "condition",
            WorkerAction::Subflow(_) => "subflow",
            WorkerAction::Hover(_) => "hover",
            WorkerAction::Scroll(_) => "scroll",
            WorkerAction::Keyboard(_) => "keyboard",
            WorkerAction::Select(_) => "select",
        }
    }

    /// Params as a JSON object
    pub fn params(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("params").map(Value::take))
            .unwrap_or(Value::Object(Map::new()))
    }
}

/// Instruction as sent to `/session/{id}/run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "InstructionWire", try_from = "InstructionWire")]
pub struct WorkerInstruction {
    pub index: u32,
    pub node_id: String,
    pub action: WorkerAction,
    pub preload_html: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize)]
struct InstructionWire {
    index: u32,
    node_id: String,
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preload_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<BTreeMap<String, String>>,
}

impl From<WorkerInstruction> for InstructionWire {
    fn from(instruction: WorkerInstruction) -> Self {
        Self {
            index: instruction.index,
            node_id: instruction.node_id,
            action_type: instruction.action.action_type().to_string(),
            params: instruction.action.params(),
            preload_html: instruction.preload_html,
            context: instruction.context,
            metadata: instruction.metadata,
        }
    }
}

impl TryFrom<InstructionWire> for WorkerInstruction {
    type Error = ConversionError;

    fn try_from(wire: InstructionWire) -> Result<Self, Self::Error> {
        Ok(Self {
            index: wire.index,
            node_id: wire.node_id,
            action: WorkerAction::from_parts(&wire.action_type, &wire.params)?,
            preload_html: wire.preload_html,
            context: wire.context,
            metadata: wire.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_typed() {
        let action = WorkerAction::from_parts("click", &json!({"selector": "#go", "click_count": 2})).unwrap();
        assert_eq!(
            action,
            WorkerAction::Click(ClickParams {
                selector: "#go".to_string(),
                button: None,
                click_count: Some(2),
                timeout_ms: None,
            })
        );
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(
            WorkerAction::from_parts("evaluate", &json!({"script": "1"})),
            Err(ConversionError::UnknownAction("evaluate".to_string()))
        );
    }

    #[test]
    fn test_params_must_match_action() {
        let err = WorkerAction::from_parts("navigate", &json!({"selector": "#x"})).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidParams { ref action, .. } if action == "navigate"));
    }

    #[test]
    fn test_null_params_for_optional_only_actions() {
        assert_eq!(
            WorkerAction::from_parts("screenshot", &Value::Null).unwrap(),
            WorkerAction::Screenshot(ScreenshotParams::default())
        );
    }

    #[test]
    fn test_wire_shape() {
        let instruction = WorkerInstruction {
            index: 3,
            node_id: "open".to_string(),
            action: WorkerAction::Navigate(NavigateParams {
                url: "http://localhost:8080/".to_string(),
                wait_until: None,
                timeout_ms: None,
            }),
            preload_html: Some("<p>hi</p>".to_string()),
            context: None,
            metadata: None,
        };

        let value = serde_json::to_value(&instruction).unwrap();
        assert_eq!(
            value,
            json!({
                "index": 3,
                "node_id": "open",
                "type": "navigate",
                "params": {"url": "http://localhost:8080/"},
                "preload_html": "<p>hi</p>"
            })
        );

        let back: WorkerInstruction = serde_json::from_value(value).unwrap();
        assert_eq!(back, instruction);
    }
}
