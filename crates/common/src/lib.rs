//! basrun Common Library
//!
//! Shared types, configuration, security policy, and validation-quality
//! analysis for the basrun playbook engine.

pub mod config;
pub mod error;
pub mod quality;
pub mod requirements;
pub mod scope;
pub mod security;
pub mod test_files;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, RunnerSettings, SecuritySettings, WorkerClass, WorkerSettings};
pub use error::{Error, Result};
pub use quality::{
    IssueType, QualityConfig, QualityIssue, ValidationQualityAnalysis, ValidationQualityAnalyzer,
};
pub use requirements::{
    Criticality, OperationalTarget, Requirement, RequirementSet, Validation, ValidationLayer,
};
pub use scope::{classify_scope_conflict, validate_scope_paths, ScopeConflict, ScopeError};
pub use security::{SecurityValidator, SecurityViolation};
pub use types::*;

/// basrun version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file name, looked up in the scenario root
pub const DEFAULT_CONFIG_FILE: &str = "basrun.toml";
