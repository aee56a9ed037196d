//! Error types for the playbook engine

use basrun_common::FailureClass;
use thiserror::Error;

use crate::capabilities::CapabilityGap;
use crate::session::SessionState;

/// Instruction could not be expressed in the worker's wire form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unknown action type '{0}'")]
    UnknownAction(String),

    #[error("invalid params for '{action}': {reason}")]
    InvalidParams { action: String, reason: String },
}

/// Registry or workflow could not be resolved
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("registry {path}: {reason}")]
    Registry { path: String, reason: String },

    #[error("playbook path '{0}' is outside the scenario root")]
    PathOutsideRoot(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("selector manifest {path}: {reason}")]
    SelectorManifest { path: String, reason: String },

    #[error("selector '{name}' not found in manifest (node {node})")]
    MissingSelector { name: String, node: String },

    #[error("fixture '{name}' not found (node {node})")]
    MissingFixture { name: String, node: String },

    #[error("fixture '{0}' includes itself")]
    FixtureCycle(String),

    #[error("unresolved token '{token}' in node {node}")]
    UnresolvedToken { node: String, token: String },

    #[error("workflow uses ${{BASE_URL}} but no base URL was resolved")]
    MissingBaseUrl,
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Worker lacks required capabilities: {}", format_gaps(.0))]
    Capability(Vec<CapabilityGap>),

    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Worker failed to start: {0}")]
    WorkerStart(String),

    #[error("Worker returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Worker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Session is {state}; cannot {operation}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    #[error("Step index {got} does not follow {last}")]
    OutOfOrder { last: u32, got: u32 },

    #[error("Seed failed: {0}")]
    Seed(String),

    #[error("Workflow rejected by validator: {0}")]
    Validation(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] basrun_common::Error),
}

impl EngineError {
    /// Runner failure class for this error
    pub fn failure_class(&self) -> FailureClass {
        match self {
            EngineError::Conversion(_)
            | EngineError::Resolve(_)
            | EngineError::Seed(_)
            | EngineError::Validation(_)
            | EngineError::Common(_) => FailureClass::Misconfiguration,

            EngineError::Capability(_)
            | EngineError::WorkerUnavailable(_)
            | EngineError::WorkerStart(_)
            | EngineError::Transport(_) => FailureClass::MissingDependency,

            EngineError::Http { .. }
            | EngineError::Protocol(_)
            | EngineError::OutOfOrder { .. }
            | EngineError::Timeout(_) => FailureClass::Execution,

            EngineError::InvalidState { .. }
            | EngineError::Cancelled
            | EngineError::Io(_)
            | EngineError::Json(_) => FailureClass::System,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

fn format_gaps(gaps: &[CapabilityGap]) -> String {
    gaps.iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type EngineResult<T> = Result<T, EngineError>;
