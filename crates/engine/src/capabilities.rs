//! Worker capability records and requirement matching

use serde::{Deserialize, Serialize};

use basrun_common::{Viewport, WorkerClass};

pub const CAPABILITIES_SCHEMA_VERSION: &str = "engine-capabilities-v1";

/// Sessions a browserless driver accepts, regardless of `MAX_SESSIONS`
pub const BROWSERLESS_MAX_SESSIONS: u32 = 4;

pub const FEATURE_HAR: &str = "har";
pub const FEATURE_VIDEO: &str = "video";
pub const FEATURE_IFRAMES: &str = "iframes";
pub const FEATURE_UPLOADS: &str = "uploads";
pub const FEATURE_DOWNLOADS: &str = "downloads";
pub const FEATURE_TRACING: &str = "tracing";
pub const FEATURE_PARALLEL_TABS: &str = "parallel-tabs";

/// Static capability record of one worker class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    pub schema_version: String,
    pub engine_name: String,
    pub version: String,
    pub max_concurrent_sessions: u32,
    pub supports_har: bool,
    pub supports_video: bool,
    pub supports_iframes: bool,
    pub supports_uploads: bool,
    pub supports_downloads: bool,
    pub supports_tracing: bool,
    pub max_viewport_width: u32,
    pub max_viewport_height: u32,
}

impl EngineCapabilities {
    /// Capabilities of a worker class; `max_sessions` applies to playwright only
    pub fn for_class(class: WorkerClass, max_sessions: u32) -> Self {
        match class {
            WorkerClass::Playwright => Self {
                schema_version: CAPABILITIES_SCHEMA_VERSION.to_string(),
                engine_name: class.to_string(),
                version: basrun_common::VERSION.to_string(),
                max_concurrent_sessions: max_sessions.clamp(
                    basrun_common::config::MIN_SESSIONS,
                    basrun_common::config::MAX_SESSIONS,
                ),
                supports_har: true,
                supports_video: true,
                supports_iframes: true,
                supports_uploads: true,
                supports_downloads: true,
                supports_tracing: true,
                max_viewport_width: 3840,
                max_viewport_height: 2160,
            },
            WorkerClass::Browserless => Self {
                schema_version: CAPABILITIES_SCHEMA_VERSION.to_string(),
                engine_name: class.to_string(),
                version: basrun_common::VERSION.to_string(),
                max_concurrent_sessions: BROWSERLESS_MAX_SESSIONS,
                supports_har: false,
                supports_video: false,
                supports_iframes: true,
                supports_uploads: true,
                supports_downloads: true,
                supports_tracing: false,
                max_viewport_width: 1920,
                max_viewport_height: 1080,
            },
        }
    }
}

/// A capability the worker is missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gap", rename_all = "snake_case")]
pub enum CapabilityGap {
    MissingFeature { feature: String },
    ViewportWidth { required: u32, max: u32 },
    ViewportHeight { required: u32, max: u32 },
}

impl std::fmt::Display for CapabilityGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityGap::MissingFeature { feature } => write!(f, "missing {}", feature),
            CapabilityGap::ViewportWidth { required, max } => {
                write!(f, "viewport width {} exceeds max {}", required, max)
            }
            CapabilityGap::ViewportHeight { required, max } => {
                write!(f, "viewport height {} exceeds max {}", required, max)
            }
        }
    }
}

/// What a plan needs from its worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityRequirement {
    pub needs_har: bool,
    pub needs_video: bool,
    pub needs_iframes: bool,
    pub needs_uploads: bool,
    pub needs_downloads: bool,
    pub needs_tracing: bool,
    pub needs_parallel_tabs: bool,
    pub min_viewport_width: u32,
    pub min_viewport_height: u32,
}

impl CapabilityRequirement {
    /// Build from feature names; unknown names are ignored
    pub fn from_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut req = Self::default();
        for feature in features {
            match feature.as_ref().trim().to_ascii_lowercase().as_str() {
                FEATURE_HAR => req.needs_har = true,
                FEATURE_VIDEO => req.needs_video = true,
                FEATURE_IFRAMES => req.needs_iframes = true,
                FEATURE_UPLOADS => req.needs_uploads = true,
                FEATURE_DOWNLOADS => req.needs_downloads = true,
                FEATURE_TRACING => req.needs_tracing = true,
                FEATURE_PARALLEL_TABS | "parallel_tabs" => req.needs_parallel_tabs = true,
                other => tracing::debug!("Ignoring unknown capability '{}'", other),
            }
        }
        req
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.min_viewport_width = self.min_viewport_width.max(viewport.width);
        self.min_viewport_height = self.min_viewport_height.max(viewport.height);
        self
    }

    /// Missing flags and insufficient dimensions; empty means satisfied
    pub fn gaps(&self, caps: &EngineCapabilities) -> Vec<CapabilityGap> {
        let flags = [
            (self.needs_har, caps.supports_har, FEATURE_HAR),
            (self.needs_video, caps.supports_video, FEATURE_VIDEO),
            (self.needs_iframes, caps.supports_iframes, FEATURE_IFRAMES),
            (self.needs_tracing, caps.supports_tracing, FEATURE_TRACING),
            (
                self.needs_parallel_tabs,
                caps.max_concurrent_sessions > 1,
                FEATURE_PARALLEL_TABS,
            ),
            (self.needs_uploads, caps.supports_uploads, FEATURE_UPLOADS),
            (self.needs_downloads, caps.supports_downloads, FEATURE_DOWNLOADS),
        ];

        let mut gaps: Vec<CapabilityGap> = flags
            .iter()
            .filter(|(needed, supported, _)| *needed && !*supported)
            .map(|(_, _, name)| CapabilityGap::MissingFeature {
                feature: name.to_string(),
            })
            .collect();

        if self.min_viewport_width > caps.max_viewport_width {
            gaps.push(CapabilityGap::ViewportWidth {
                required: self.min_viewport_width,
                max: caps.max_viewport_width,
            });
        }
        if self.min_viewport_height > caps.max_viewport_height {
            gaps.push(CapabilityGap::ViewportHeight {
                required: self.min_viewport_height,
                max: caps.max_viewport_height,
            });
        }

        gaps
    }

    pub fn is_satisfied_by(&self, caps: &EngineCapabilities) -> bool {
        self.gaps(caps).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playwright_satisfies_everything_by_default() {
        let caps = EngineCapabilities::for_class(WorkerClass::Playwright, 10);
        let req = CapabilityRequirement::from_features(["har", "video", "tracing", "parallel-tabs"])
            .with_viewport(Viewport::default());
        assert!(req.gaps(&caps).is_empty());
    }

    #[test]
    fn test_browserless_gaps() {
        let caps = EngineCapabilities::for_class(WorkerClass::Browserless, 50);
        assert_eq!(caps.max_concurrent_sessions, 4);

        let req = CapabilityRequirement::from_features(["har", "uploads"]).with_viewport(Viewport {
            width: 2560,
            height: 1440,
        });
        assert_eq!(
            req.gaps(&caps),
            vec![
                CapabilityGap::MissingFeature { feature: "har".to_string() },
                CapabilityGap::ViewportWidth { required: 2560, max: 1920 },
                CapabilityGap::ViewportHeight { required: 1440, max: 1080 },
            ]
        );
    }

    #[test]
    fn test_parallel_tabs_needs_more_than_one_session() {
        let caps = EngineCapabilities::for_class(WorkerClass::Playwright, 1);
        let req = CapabilityRequirement::from_features(["parallel-tabs"]);
        assert_eq!(req.gaps(&caps).len(), 1);
    }

    #[test]
    fn test_sessions_clamped() {
        assert_eq!(EngineCapabilities::for_class(WorkerClass::Playwright, 0).max_concurrent_sessions, 1);
        assert_eq!(
            EngineCapabilities::for_class(WorkerClass::Playwright, 500).max_concurrent_sessions,
            100
        );
    }
}
