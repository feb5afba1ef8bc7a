//! Playhead Core - Adaptive Streaming Orchestration
//!
//! This crate decides how a media URL gets played and keeps playing it
//! through partial failures:
//! - Strategy resolution from source URL and runtime capabilities
//! - Load orchestration with retries, backoff and failover across sources
//! - Supersession and cancellation of in-flight loads
//! - DRM key-system negotiation and license exchange
//! - Failure-isolated plugin fan-out and analytics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Playhead Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  Capability  │  │   Strategy   │  │    Retry     │          │
//! │  │    Cache     │  │   Registry   │  │    Policy    │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │    Load     │                              │
//! │                    │ Orchestrator│                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │    Plugin    │  │   Engine    │  │     DRM      │           │
//! │  │     Bus      │  │   Events    │  │  Negotiator  │           │
//! │  └──────────────┘  └─────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod capability;
pub mod media;
pub mod retry;
pub mod strategy;
pub mod drm;
pub mod plugin;
pub mod analytics;
pub mod events;
pub mod telemetry;
pub mod orchestrator;

pub use error::{classify_message, Error, ErrorCategory, Result};
pub use types::*;
pub use capability::{CapabilityCache, CapabilityProbe, StaticProbe};
pub use media::{EncryptedInit, HeadlessElement, MediaElement, MediaEvent};
pub use retry::{calculate_retry_delay, classify_error, RetryOn, RetryPolicy};
pub use strategy::{
    AdaptiveEngine, AdaptiveEngineFactory, AdaptiveEvent, PlaybackStrategy, QualityCallback,
    StrategyContext, StrategyDescriptor, StrategyRegistry,
};
pub use drm::{
    ContentProtection, DrmConfig, DrmNegotiator, DrmSession, DrmSystem, KeySession,
    KeySystemConfig, LicenseHandler, LicenseRequest, MediaKeys,
};
pub use plugin::{LifecyclePhase, Plugin, PluginBus, PluginResult};
pub use analytics::{AnalyticsEvent, AnalyticsPlugin};
pub use events::EngineEvent;
pub use orchestrator::LoadOrchestrator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version
pub fn init() {
    tracing::info!(version = VERSION, "Playhead Core initialized");
}
