//! HTTP client for the browser worker protocol

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use basrun_common::Viewport;

use crate::capabilities::CapabilityRequirement;
use crate::converter::WorkerRunResponse;
use crate::error::{EngineError, EngineResult};
use crate::instruction::WorkerInstruction;
use crate::session::ReuseMode;
use crate::workflow::ResolvedWorkflow;

/// Header carrying the execution id on every bound request
pub const EXECUTION_ID_HEADER: &str = "X-Execution-Id";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserHealth {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `/health` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sessions: Option<u32>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub browser: Option<BrowserHealth>,
}

impl WorkerHealth {
    pub fn is_healthy(&self) -> bool {
        self.problem().is_none()
    }

    /// Why the worker is not healthy, if it isn't
    pub fn problem(&self) -> Option<String> {
        if self.status != "ok" {
            return Some(format!("status '{}'", self.status));
        }
        match &self.browser {
            Some(browser) if !browser.healthy => Some(format!(
                "browser unhealthy: {}",
                browser.error.as_deref().unwrap_or("no error reported")
            )),
            _ => None,
        }
    }
}

/// `/session/start` request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub execution_id: String,
    pub workflow_id: String,
    pub viewport: Viewport,
    pub reuse_mode: ReuseMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub required_capabilities: CapabilityRequirement,
}

#[derive(Debug, Clone, Deserialize)]
struct StartSessionResponse {
    session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExecuteResponse {
    execution_id: String,
}

/// `/workflows/validate-resolved` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub warnings: Vec<Value>,
    #[serde(default)]
    pub schema_version: Option<String>,
}

impl ValidationReport {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(message_of).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(message_of).collect()
    }
}

fn message_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

/// `/executions/{id}` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn state(&self) -> ExecutionState {
        match self.status.to_ascii_lowercase().as_str() {
            "pending" | "queued" => ExecutionState::Pending,
            "running" | "in_progress" => ExecutionState::Running,
            "completed" | "succeeded" | "success" | "passed" => ExecutionState::Completed,
            "failed" | "error" => ExecutionState::Failed,
            "cancelled" | "canceled" => ExecutionState::Cancelled,
            _ => ExecutionState::Unknown,
        }
    }
}

/// Worker protocol operations
#[async_trait]
pub trait WorkerApi: Send + Sync {
    fn base_url(&self) -> &str;

    async fn health(&self) -> EngineResult<WorkerHealth>;

    /// Returns the session id
    async fn start_session(&self, request: &StartSessionRequest) -> EngineResult<String>;

    async fn run_instruction(
        &self,
        session_id: &str,
        execution_id: &str,
        instruction: &WorkerInstruction,
    ) -> EngineResult<WorkerRunResponse>;

    async fn reset_session(&self, session_id: &str, execution_id: &str) -> EngineResult<()>;

    async fn close_session(&self, session_id: &str, execution_id: &str) -> EngineResult<()>;

    async fn validate_resolved(&self, workflow: &ResolvedWorkflow) -> EngineResult<ValidationReport>;

    /// Returns the execution id
    async fn execute_adhoc(&self, workflow: &ResolvedWorkflow, name: Option<&str>) -> EngineResult<String>;

    async fn execution_status(&self, execution_id: &str) -> EngineResult<ExecutionStatus>;

    /// Raw timeline document
    async fn timeline(&self, execution_id: &str) -> EngineResult<Vec<u8>>;

    /// Fetch an absolute URL or a path relative to the worker
    async fn download(&self, url: &str) -> EngineResult<Vec<u8>>;
}

/// reqwest implementation of [`WorkerApi`]
#[derive(Debug, Clone)]
pub struct WorkerClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> EngineResult<Response> {
        let response = request.send().await.map_err(|e| transport(e, what))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> EngineResult<T> {
        let response = self.send(request, what).await?;
        let bytes = response.bytes().await.map_err(|e| transport(e, what))?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::Protocol(format!("{}: {}", what, e)))
    }
}

fn transport(error: reqwest::Error, what: &str) -> EngineError {
    if error.is_timeout() {
        EngineError::Timeout(what.to_string())
    } else {
        EngineError::Transport(error)
    }
}

#[async_trait]
impl WorkerApi for WorkerClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health(&self) -> EngineResult<WorkerHealth> {
        self.send_json(self.http.get(self.url("/health")), "health").await
    }

    async fn start_session(&self, request: &StartSessionRequest) -> EngineResult<String> {
        let req = self
            .http
            .post(self.url("/session/start"))
            .header(EXECUTION_ID_HEADER, &request.execution_id)
            .json(request);
        let resp: StartSessionResponse = self.send_json(req, "session start").await?;
        debug!(execution_id = %request.execution_id, session_id = %resp.session_id, "Session started");
        Ok(resp.session_id)
    }

    async fn run_instruction(
        &self,
        session_id: &str,
        execution_id: &str,
        instruction: &WorkerInstruction,
    ) -> EngineResult<WorkerRunResponse> {
        let req = self
            .http
            .post(self.url(&format!("/session/{}/run", session_id)))
            .header(EXECUTION_ID_HEADER, execution_id)
            .json(&json!({ "instruction": instruction }));
        self.send_json(req, "session run").await
    }

    async fn reset_session(&self, session_id: &str, execution_id: &str) -> EngineResult<()> {
        let req = self
            .http
            .post(self.url(&format!("/session/{}/reset", session_id)))
            .header(EXECUTION_ID_HEADER, execution_id);
        self.send(req, "session reset").await.map(|_| ())
    }

    async fn close_session(&self, session_id: &str, execution_id: &str) -> EngineResult<()> {
        let req = self
            .http
            .post(self.url(&format!("/session/{}/close", session_id)))
            .header(EXECUTION_ID_HEADER, execution_id);
        self.send(req, "session close").await.map(|_| ())
    }

    async fn validate_resolved(&self, workflow: &ResolvedWorkflow) -> EngineResult<ValidationReport> {
        let req = self.http.post(self.url("/workflows/validate-resolved")).json(workflow);
        self.send_json(req, "validate").await
    }

    async fn execute_adhoc(&self, workflow: &ResolvedWorkflow, name: Option<&str>) -> EngineResult<String> {
        let mut body = json!({ "workflow": workflow });
        if let Some(name) = name {
            body["name"] = Value::String(name.to_string());
        }
        let req = self.http.post(self.url("/workflows/execute-adhoc")).json(&body);
        let resp: ExecuteResponse = self.send_json(req, "execute").await?;
        if resp.execution_id.is_empty() {
            return Err(EngineError::Protocol("execute: empty execution_id".to_string()));
        }
        Ok(resp.execution_id)
    }

    async fn execution_status(&self, execution_id: &str) -> EngineResult<ExecutionStatus> {
        let req = self
            .http
            .get(self.url(&format!("/executions/{}", execution_id)))
            .header(EXECUTION_ID_HEADER, execution_id);
        self.send_json(req, "execution status").await
    }

    async fn timeline(&self, execution_id: &str) -> EngineResult<Vec<u8>> {
        let req = self
            .http
            .get(self.url(&format!("/executions/{}/timeline", execution_id)))
            .header(EXECUTION_ID_HEADER, execution_id);
        let response = self.send(req, "timeline").await?;
        let bytes = response.bytes().await.map_err(|e| transport(e, "timeline"))?;
        Ok(bytes.to_vec())
    }

    async fn download(&self, url: &str) -> EngineResult<Vec<u8>> {
        let target = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.url(&format!("/{}", url.trim_start_matches('/')))
        };
        let response = self.send(self.http.get(&target), "download").await?;
        let bytes = response.bytes().await.map_err(|e| transport(e, "download"))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_problem() {
        let ok = WorkerHealth {
            status: "ok".to_string(),
            ..Default::default()
        };
        assert!(ok.is_healthy());

        let broken_browser = WorkerHealth {
            status: "ok".to_string(),
            browser: Some(BrowserHealth {
                healthy: false,
                version: None,
                error: Some("chromium crashed".to_string()),
            }),
            ..Default::default()
        };
        assert!(broken_browser.problem().unwrap().contains("chromium crashed"));

        let error = WorkerHealth {
            status: "error".to_string(),
            ..Default::default()
        };
        assert!(!error.is_healthy());
    }

    #[test]
    fn test_execution_state() {
        let status = |s: &str| ExecutionStatus {
            status: s.to_string(),
            ..Default::default()
        };
        assert_eq!(status("completed").state(), ExecutionState::Completed);
        assert_eq!(status("FAILED").state(), ExecutionState::Failed);
        assert!(status("canceled").state().is_terminal());
        assert!(!status("running").state().is_terminal());
        assert_eq!(status("weird").state(), ExecutionState::Unknown);
    }

    #[test]
    fn test_validation_messages() {
        let report: ValidationReport = serde_json::from_value(json!({
            "valid": false,
            "errors": ["edge e1 dangles", {"message": "node n2 has no type", "node": "n2"}],
            "warnings": []
        }))
        .unwrap();
        assert_eq!(
            report.error_messages(),
            vec!["edge e1 dangles".to_string(), "node n2 has no type".to_string()]
        );
    }
}
