//! Engine lifecycle events
//!
//! The stream a UI state layer mirrors. Delivered over a broadcast channel
//! from [`crate::LoadOrchestrator::subscribe`]; slow receivers lag rather
//! than block the engine.

use crate::types::{CapabilitySnapshot, LoadRequestId, QualityLevel};
use serde::{Deserialize, Serialize};

/// Engine event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Capabilities resolved; emitted once per engine
    Ready { capabilities: CapabilitySnapshot },

    /// A strategy attempt is starting
    LoadStart {
        request_id: LoadRequestId,
        src: String,
        strategy: String,
        /// 1-based attempt number across the whole request
        attempt: u32,
        total_attempts: u32,
    },

    /// A strategy attached and the first frame loaded
    LoadEnd {
        request_id: LoadRequestId,
        src: String,
        strategy: String,
    },

    /// A failed attempt will be retried after `delay_ms`
    Retry {
        src: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },

    /// Moving on to the next candidate source
    Failover { from: String, to: String, reason: String },

    Play,
    Pause,

    TimeUpdate { current_time: f64, duration: f64 },

    Progress { buffered_percent: f64 },

    VolumeChange { volume: f64, muted: bool },

    QualityChange { level: QualityLevel },

    Error {
        code: String,
        message: String,
        fatal: bool,
    },
}

impl EngineEvent {
    /// Event name as used in serialized form
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Ready { .. } => "ready",
            EngineEvent::LoadStart { .. } => "load_start",
            EngineEvent::LoadEnd { .. } => "load_end",
            EngineEvent::Retry { .. } => "retry",
            EngineEvent::Failover { .. } => "failover",
            EngineEvent::Play => "play",
            EngineEvent::Pause => "pause",
            EngineEvent::TimeUpdate { .. } => "time_update",
            EngineEvent::Progress { .. } => "progress",
            EngineEvent::VolumeChange { .. } => "volume_change",
            EngineEvent::QualityChange { .. } => "quality_change",
            EngineEvent::Error { .. } => "error",
        }
    }

    /// High-frequency telemetry subject to frame coalescing
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            EngineEvent::TimeUpdate { .. } | EngineEvent::Progress { .. }
        )
    }
}
