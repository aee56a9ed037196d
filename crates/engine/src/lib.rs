//! basrun playbook engine
//!
//! Drives declarative browser-automation workflows against a remote worker:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PlaybookRunner                         │
//! │    ├── registry.json ──▶ WorkflowResolver                   │
//! │    │     ├── @selector/<name>  ──▶ selector manifest        │
//! │    │     ├── @fixture/<id>     ──▶ inlined subflow          │
//! │    │     └── ${BASE_URL}       ──▶ UI base URL              │
//! │    ├── WorkerLocator / WorkerStarter ──▶ health gate        │
//! │    ├── SeedManager (apply / deferred cleanup)               │
//! │    ├── WorkerApi: validate ▸ execute ▸ poll ▸ timeline      │
//! │    └── ArtifactWriter ──▶ coverage/                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkerSession (step-by-step)                               │
//! │    CompiledInstruction ──Converter──▶ WorkerInstruction     │
//! │    WorkerStepResult    ──Converter──▶ StepOutcome           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod capabilities;
pub mod client;
pub mod converter;
pub mod error;
pub mod instruction;
pub mod outcome;
pub mod resolver;
pub mod runner;
pub mod seeds;
pub mod session;
pub mod timeline;
pub mod worker;
pub mod workflow;

pub use artifacts::{ArtifactWriter, FsArtifactWriter};
pub use capabilities::{CapabilityGap, CapabilityRequirement, EngineCapabilities};
pub use client::{WorkerApi, WorkerClient, WorkerHealth};
pub use converter::{Converter, DefaultConverter, WorkerRunResponse, WorkerStepResult};
pub use error::{ConversionError, EngineError, EngineResult, ResolveError};
pub use instruction::{CompiledInstruction, WorkerAction, WorkerInstruction};
pub use outcome::{StepFailure, StepOutcome};
pub use resolver::{FsPlaybookResolver, WorkflowResolver};
pub use runner::{PlaybookResult, PlaybookRunner, PlaybookStatus, RunResult};
pub use seeds::{NoopSeedManager, ScriptSeedManager, SeedManager};
pub use session::{ReuseMode, SessionSpec, SessionState, WorkerSession};
pub use timeline::{Timeline, TimelineSummary};
pub use worker::{ConfigWorkerLocator, ProcessWorkerStarter, WorkerLocator, WorkerStarter};
pub use workflow::{Registry, RegistryEntry, ResolvedWorkflow, WorkflowDefinition};
