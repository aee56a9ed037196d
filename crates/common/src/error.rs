//! Error types for basrun

use thiserror::Error;

use crate::scope::ScopeError;
use crate::security::SecurityViolation;

/// Result type alias using the basrun common Error
pub type Result<T> = std::result::Result<T, Error>;

/// basrun common error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Security policy violation: {0}")]
    Security(#[from] SecurityViolation),

    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),
}
