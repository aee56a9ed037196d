//! Core types shared across basrun crates

use serde::{Deserialize, Serialize};

/// Default viewport width for worker sessions
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;

/// Default viewport height for worker sessions
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Classification the runner assigns to every non-success run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// Fixable by an operator editing files
    Misconfiguration,
    /// An external system is unavailable
    MissingDependency,
    /// A workflow ran and failed
    Execution,
    /// Infrastructure failure or cancellation
    System,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Misconfiguration => "misconfiguration",
            FailureClass::MissingDependency => "missing-dependency",
            FailureClass::Execution => "execution",
            FailureClass::System => "system",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a runner observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Info,
    Success,
    Warning,
    Error,
    Skip,
    Section,
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationKind::Info => write!(f, "info"),
            ObservationKind::Success => write!(f, "success"),
            ObservationKind::Warning => write!(f, "warning"),
            ObservationKind::Error => write!(f, "error"),
            ObservationKind::Skip => write!(f, "skip"),
            ObservationKind::Section => write!(f, "section"),
        }
    }
}

/// A single human-readable line recorded while a run progresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ObservationKind,
    pub message: String,
}

impl Observation {
    pub fn new(kind: ObservationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ObservationKind::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ObservationKind::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ObservationKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ObservationKind::Error, message)
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(ObservationKind::Skip, message)
    }

    pub fn section(message: impl Into<String>) -> Self {
        Self::new(ObservationKind::Section, message)
    }
}

/// Issue severity used by the validation-quality analyzer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_default() {
        let viewport = Viewport::default();
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
        assert_eq!(viewport.to_string(), "1920x1080");
    }

    #[test]
    fn test_failure_class_serializes_kebab_case() {
        let json = serde_json::to_string(&FailureClass::MissingDependency).unwrap();
        assert_eq!(json, "\"missing-dependency\"");
        assert_eq!(FailureClass::Misconfiguration.to_string(), "misconfiguration");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
