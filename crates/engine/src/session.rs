//! Worker session: a per-execution handle over the worker protocol
//!
//! ```text
//! New ──start──▶ Starting ──ack──▶ Running ──close──▶ Closing ──▶ Closed
//!                    │                 │ ▲
//!                    └──error──▶ Closed└─┘ run / reset
//! ```
//!
//! `run` takes `&mut self`, so one session never has two instructions in
//! flight.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use basrun_common::Viewport;

use crate::capabilities::{CapabilityRequirement, EngineCapabilities};
use crate::client::{StartSessionRequest, WorkerApi};
use crate::converter::{Converter, DefaultConverter};
use crate::error::{EngineError, EngineResult};
use crate::instruction::CompiledInstruction;
use crate::outcome::StepOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Starting,
    Running,
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::New => write!(f, "new"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// How the worker treats browser state from earlier sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseMode {
    #[default]
    Fresh,
    Clean,
    Reuse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSpec {
    pub execution_id: String,
    pub workflow_id: String,
    pub viewport: Viewport,
    pub reuse_mode: ReuseMode,
    pub base_url: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub requirement: CapabilityRequirement,
}

impl SessionSpec {
    /// A spec with a freshly minted execution id
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            viewport: Viewport::default(),
            reuse_mode: ReuseMode::default(),
            base_url: None,
            labels: BTreeMap::new(),
            requirement: CapabilityRequirement::default(),
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_reuse_mode(mut self, mode: ReuseMode) -> Self {
        self.reuse_mode = mode;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_requirement(mut self, requirement: CapabilityRequirement) -> Self {
        self.requirement = requirement;
        self
    }
}

/// Stateful handle bound to one execution id
pub struct WorkerSession {
    api: Arc<dyn WorkerApi>,
    converter: Arc<dyn Converter>,
    capabilities: EngineCapabilities,
    state: SessionState,
    execution_id: String,
    session_id: Option<String>,
    last_index: Option<u32>,
}

impl WorkerSession {
    pub fn new(api: Arc<dyn WorkerApi>, capabilities: EngineCapabilities) -> Self {
        Self {
            api,
            converter: Arc::new(DefaultConverter),
            capabilities,
            state: SessionState::New,
            execution_id: String::new(),
            session_id: None,
            last_index: None,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    /// Create and start a session in one call
    pub async fn open(
        api: Arc<dyn WorkerApi>,
        capabilities: EngineCapabilities,
        spec: SessionSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<Self> {
        let mut session = Self::new(api, capabilities);
        session.start(spec, cancel).await?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub async fn start(&mut self, spec: SessionSpec, cancel: &CancellationToken) -> EngineResult<()> {
        if self.state != SessionState::New {
            return Err(EngineError::InvalidState {
                state: self.state,
                operation: "start",
            });
        }
        self.state = SessionState::Starting;
        self.execution_id = spec.execution_id.clone();

        match self.handshake(spec, cancel).await {
            Ok(session_id) => {
                info!(execution_id = %self.execution_id, session_id = %session_id, "Session running");
                self.session_id = Some(session_id);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                warn!(execution_id = %self.execution_id, "Session failed to start: {}", e);
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn handshake(&self, spec: SessionSpec, cancel: &CancellationToken) -> EngineResult<String> {
        let viewport = Viewport {
            width: if spec.viewport.width == 0 { Viewport::default().width } else { spec.viewport.width },
            height: if spec.viewport.height == 0 { Viewport::default().height } else { spec.viewport.height },
        };
        let requirement = spec.requirement.clone().with_viewport(viewport);

        let gaps = requirement.gaps(&self.capabilities);
        if !gaps.is_empty() {
            return Err(EngineError::Capability(gaps));
        }

        let health = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            health = self.api.health() => health?,
        };
        if let Some(problem) = health.problem() {
            return Err(EngineError::WorkerUnavailable(problem));
        }

        let request = StartSessionRequest {
            execution_id: spec.execution_id,
            workflow_id: spec.workflow_id,
            viewport,
            reuse_mode: spec.reuse_mode,
            base_url: spec.base_url,
            labels: spec.labels,
            required_capabilities: requirement,
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            id = self.api.start_session(&request) => id,
        }
    }

    /// Execute one instruction. A failed step is an `Ok` outcome; only
    /// transport problems are errors.
    pub async fn run(
        &mut self,
        instruction: &CompiledInstruction,
        cancel: &CancellationToken,
    ) -> EngineResult<StepOutcome> {
        if self.state != SessionState::Running {
            return Err(EngineError::InvalidState {
                state: self.state,
                operation: "run",
            });
        }
        let session_id = self.session_id.clone().ok_or(EngineError::InvalidState {
            state: self.state,
            operation: "run",
        })?;

        match self.last_index {
            Some(last) if instruction.index <= last => {
                return Err(EngineError::OutOfOrder {
                    last,
                    got: instruction.index,
                })
            }
            None if instruction.index != 0 => {
                return Err(EngineError::OutOfOrder {
                    last: 0,
                    got: instruction.index,
                })
            }
            _ => {}
        }

        let started_at = Utc::now();
        let wire = self.converter.to_worker(instruction)?;

        debug!(
            execution_id = %self.execution_id,
            index = instruction.index,
            node_id = %instruction.node_id,
            "Running {}",
            instruction.action_type
        );
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            response = self.api.run_instruction(&session_id, &self.execution_id, &wire) => response?,
        };

        self.last_index = Some(instruction.index);
        Ok(self
            .converter
            .from_worker_step(&self.execution_id, instruction, started_at, &response))
    }

    /// Clean browser state but keep the session. No-op unless running.
    pub async fn reset(&mut self) -> EngineResult<()> {
        if self.state != SessionState::Running {
            return Ok(());
        }
        let Some(session_id) = self.session_id.clone() else {
            return Ok(());
        };

        self.state = SessionState::Closing;
        let result = self.api.reset_session(&session_id, &self.execution_id).await;
        self.state = SessionState::Running;
        if let Err(e) = &result {
            warn!(execution_id = %self.execution_id, "Session reset failed: {}", e);
        }
        result
    }

    /// Close the session. Always ends `Closed`; repeated calls are no-ops.
    pub async fn close(&mut self) -> EngineResult<()> {
        if matches!(self.state, SessionState::Closed | SessionState::New) {
            self.state = SessionState::Closed;
            return Ok(());
        }

        self.state = SessionState::Closing;
        let result = match self.session_id.as_deref() {
            Some(id) => self.api.close_session(id, &self.execution_id).await,
            None => Ok(()),
        };
        self.state = SessionState::Closed;

        if let Err(e) = &result {
            warn!(execution_id = %self.execution_id, "Session close failed: {}", e);
        }
        result
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            warn!(
                execution_id = %self.execution_id,
                "Session dropped while running; worker will reap it"
            );
        }
    }
}
