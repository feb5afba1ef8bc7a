//! Error types for Playhead Core

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use regex::Regex;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration error types
#[derive(Error, Debug)]
pub enum Error {
    // Cancellation errors
    #[error("Load request superseded by a newer request")]
    Superseded,

    #[error("Load request aborted")]
    Aborted,

    #[error("Engine used after dispose")]
    Disposed,

    // Source errors
    #[error("Unsupported format: no playback strategy for {src}")]
    UnsupportedFormat { src: String },

    #[error("Media element error: {0}")]
    MediaElement(String),

    #[error("Playback engine fatal error: {0}")]
    Engine(String),

    // Network errors
    #[error("{operation} timeout after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded with HTTP {status}")]
    Server { status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // DRM errors
    #[error("No supported key system (tried {tried:?}): {last}")]
    KeySystemUnavailable { tried: Vec<String>, last: String },

    #[error("Failed to attach media keys: {0}")]
    MediaKeys(String),

    #[error("License exchange failed: {0}")]
    LicenseExchange(String),

    // Terminal errors
    #[error("All sources failed after {attempts} attempts: {last_error}")]
    AllCandidatesFailed { attempts: u32, last_error: String },

    #[error("Capability detection failed: {0}")]
    CapabilityProbe(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retry classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Server,
    Unsupported,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Server => write!(f, "server"),
            ErrorCategory::Unsupported => write!(f, "unsupported"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

static TIMEOUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)time(d)?[\s_-]?out").expect("valid timeout pattern"));

static NETWORK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)network|connection|connect|offline|unreachable|dns|socket|fetch failed|econn")
        .expect("valid network pattern")
});

static SERVER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(http|status)[\s:]*5\d\d\b|\b5\d\d\s+(internal|bad gateway|service unavailable|gateway)")
        .expect("valid server pattern")
});

static UNSUPPORTED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unsupported|not[\s_]supported|codec|format|mime|decode|demux")
        .expect("valid unsupported pattern")
});

/// Classify a human-readable error message into a retry category.
///
/// Used for errors that only reach us as text (third-party engines, the media
/// element's error event). Order matters: timeouts are network failures too.
pub fn classify_message(message: &str) -> ErrorCategory {
    if TIMEOUT_PATTERN.is_match(message) {
        ErrorCategory::Timeout
    } else if SERVER_PATTERN.is_match(message) {
        ErrorCategory::Server
    } else if NETWORK_PATTERN.is_match(message) {
        ErrorCategory::Network
    } else if UNSUPPORTED_PATTERN.is_match(message) {
        ErrorCategory::Unsupported
    } else {
        ErrorCategory::Unknown
    }
}

impl Error {
    /// Create a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after_ms,
        }
    }

    /// Create an unsupported-format error for a source
    pub fn unsupported(src: impl Into<String>) -> Self {
        Error::UnsupportedFormat { src: src.into() }
    }

    /// Returns true for supersession, abort and disposal.
    ///
    /// These are never user-facing failures and must be checked before any
    /// other classification.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Superseded | Error::Aborted | Error::Disposed)
    }

    /// Returns true if this error means DRM setup failed for the whole load
    pub fn is_drm_fatal(&self) -> bool {
        matches!(self, Error::KeySystemUnavailable { .. } | Error::MediaKeys(_))
    }

    /// Retry category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Server { .. } => ErrorCategory::Server,
            Error::UnsupportedFormat { .. } => ErrorCategory::Unsupported,
            Error::Http(e) => {
                if e.is_timeout() {
                    ErrorCategory::Timeout
                } else if e.status().is_some_and(|s| s.is_server_error()) {
                    ErrorCategory::Server
                } else if e.is_connect() || e.is_request() || e.is_body() {
                    ErrorCategory::Network
                } else {
                    ErrorCategory::Unknown
                }
            }
            Error::Network(msg) => match classify_message(msg) {
                ErrorCategory::Unknown | ErrorCategory::Unsupported => ErrorCategory::Network,
                category => category,
            },
            Error::Engine(msg) | Error::MediaElement(msg) => classify_message(msg),
            _ => ErrorCategory::Unknown,
        }
    }

    /// Returns true if the error is worth another attempt under the default policy
    pub fn is_recoverable(&self) -> bool {
        !self.is_cancellation()
            && matches!(
                self.category(),
                ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server
            )
    }

    /// Returns the error code for analytics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Superseded => "SUPERSEDED",
            Error::Aborted => "ABORTED",
            Error::Disposed => "DISPOSED",
            Error::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Error::MediaElement(_) => "MEDIA_ELEMENT",
            Error::Engine(_) => "ENGINE_FATAL",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Network(_) => "NETWORK",
            Error::Server { .. } => "SERVER",
            Error::Http(_) => "HTTP",
            Error::KeySystemUnavailable { .. } => "DRM_UNSUPPORTED",
            Error::MediaKeys(_) => "DRM_MEDIA_KEYS",
            Error::LicenseExchange(_) => "LICENSE_EXCHANGE",
            Error::AllCandidatesFailed { .. } => "ALL_SOURCES_FAILED",
            Error::CapabilityProbe(_) => "CAPABILITY_PROBE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message() {
        assert_eq!(classify_message("Request timed out"), ErrorCategory::Timeout);
        assert_eq!(classify_message("manifestLoadTimeOut"), ErrorCategory::Timeout);
        assert_eq!(classify_message("HTTP 503 from origin"), ErrorCategory::Server);
        assert_eq!(classify_message("502 Bad Gateway"), ErrorCategory::Server);
        assert_eq!(classify_message("Network connection lost"), ErrorCategory::Network);
        assert_eq!(classify_message("codec not supported"), ErrorCategory::Unsupported);
        assert_eq!(classify_message("something odd"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_structured_categories() {
        assert_eq!(Error::timeout("load", 30_000).category(), ErrorCategory::Timeout);
        assert_eq!(Error::Server { status: 500 }.category(), ErrorCategory::Server);
        assert_eq!(Error::unsupported("a.xyz").category(), ErrorCategory::Unsupported);
        assert_eq!(Error::Network("reset by peer".into()).category(), ErrorCategory::Network);
        assert_eq!(Error::Engine("fragParsingError".into()).category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_cancellation_is_not_recoverable() {
        assert!(Error::Superseded.is_cancellation());
        assert!(Error::Aborted.is_cancellation());
        assert!(Error::Disposed.is_cancellation());
        assert!(!Error::Aborted.is_recoverable());
        assert!(Error::timeout("load", 10).is_recoverable());
    }
}
