//! Core types for Playhead

use crate::drm::DrmConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Monotonic identifier assigned to every `load_source` call
pub type LoadRequestId = u64;

/// Operating system family of the playback runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Ios,
    Android,
    MacOs,
    Windows,
    Linux,
    #[default]
    Other,
}

impl OsFamily {
    /// iOS, iPadOS and macOS share the Apple media stack
    pub fn is_apple(&self) -> bool {
        matches!(self, OsFamily::Ios | OsFamily::MacOs)
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsFamily::Ios => write!(f, "ios"),
            OsFamily::Android => write!(f, "android"),
            OsFamily::MacOs => write!(f, "macos"),
            OsFamily::Windows => write!(f, "windows"),
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Other => write!(f, "other"),
        }
    }
}

/// What the runtime can do, captured once per engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    /// The media element plays HLS without a third-party engine
    pub native_hls: bool,
    /// Media Source Extensions are available for segmented engines
    pub mse: bool,
    /// OS family of the runtime
    pub os: OsFamily,
    /// Unmuted autoplay is permitted
    pub autoplay: bool,
    /// Picture-in-picture is supported
    pub picture_in_picture: bool,
}

impl CapabilitySnapshot {
    /// Typical iOS Safari runtime
    pub fn ios() -> Self {
        Self {
            native_hls: true,
            mse: false,
            os: OsFamily::Ios,
            autoplay: false,
            picture_in_picture: true,
        }
    }

    /// Typical desktop Chromium runtime
    pub fn desktop() -> Self {
        Self {
            native_hls: false,
            mse: true,
            os: OsFamily::Windows,
            autoplay: true,
            picture_in_picture: true,
        }
    }

    /// Typical Android Chrome runtime
    pub fn android() -> Self {
        Self {
            native_hls: false,
            mse: true,
            os: OsFamily::Android,
            autoplay: false,
            picture_in_picture: true,
        }
    }
}

/// A rendition the active strategy can switch to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Strategy-scoped identifier
    pub id: String,
    /// Human-readable name (e.g. "720p")
    pub label: String,
    /// Vertical resolution if known
    pub height: Option<u32>,
    /// Bandwidth in bits per second if known
    pub bitrate: Option<u64>,
}

impl QualityLevel {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            height: None,
            bitrate: None,
        }
    }

    /// Level labelled after its height, e.g. "1080p"
    pub fn with_height(id: impl Into<String>, height: u32) -> Self {
        Self {
            id: id.into(),
            label: format!("{}p", height),
            height: Some(height),
            bitrate: None,
        }
    }
}

/// Basic element configuration applied before any strategy attaches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub autoplay: bool,
    pub muted: bool,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    pub plays_inline: bool,
    pub poster: Option<String>,
}

/// A request to load media, with fallbacks and policies
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    /// Primary source URL
    pub src: String,
    /// Fallback sources, tried in order after the primary
    pub fallbacks: Vec<String>,
    /// Content protection to negotiate before any strategy attempt
    pub drm: Option<DrmConfig>,
    /// Retry policy; the engine default applies when absent
    pub retry: Option<RetryPolicy>,
    /// Caller-owned cancellation signal
    pub cancel: CancellationToken,
}

impl LoadRequest {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    pub fn with_fallbacks<I, S>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallbacks = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_drm(mut self, drm: DrmConfig) -> Self {
        self.drm = Some(drm);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Primary followed by fallbacks, trimmed, empty entries dropped and
    /// de-duplicated by first occurrence.
    pub fn candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(1 + self.fallbacks.len());
        for src in std::iter::once(&self.src).chain(self.fallbacks.iter()) {
            let trimmed = src.trim();
            if trimmed.is_empty() || out.iter().any(|s| s == trimmed) {
                continue;
            }
            out.push(trimmed.to_string());
        }
        out
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Element configuration applied on every load
    pub video: VideoConfig,
    /// Retry policy for requests that do not carry one
    pub retry: RetryPolicy,
    /// Native and direct strategy load timeout in milliseconds
    pub load_timeout_ms: u64,
    /// DRM license exchange timeout in milliseconds
    pub license_timeout_ms: u64,
    /// Telemetry coalescing interval in milliseconds (one animation frame)
    pub frame_interval_ms: u64,
    /// Engine event broadcast capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig::default(),
            retry: RetryPolicy::default(),
            load_timeout_ms: 30_000,
            license_timeout_ms: 15_000,
            frame_interval_ms: 16,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.frame_interval_ms == 0 {
            return Err(Error::InvalidConfig("frame_interval_ms must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn license_timeout(&self) -> Duration {
        Duration::from_millis(self.license_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}
