//! Analytics subscriber
//!
//! Records lifecycle events for:
//! - Startup and failover diagnostics
//! - Error tracking
//! - Rendition usage
//!
//! Time updates are not recorded; they are too frequent to be useful here.

use crate::error::{Error, ErrorCategory};
use crate::plugin::{FailoverNotice, Plugin, PluginResult, RetryNotice, SourceAttempt};
use crate::types::{CapabilitySnapshot, QualityLevel};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// Default number of records kept before the oldest are dropped
pub const DEFAULT_BUFFER_SIZE: usize = 500;

/// Analytics event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    /// Engine initialized
    Init { native_hls: bool, mse: bool, os: String },

    /// Strategy attempt started
    LoadStart { src: String, strategy: Option<String>, attempt: u32 },

    /// Source loaded
    Loaded { src: String, strategy: String, attempt: u32 },

    /// Attempt failed
    LoadFailed {
        src: String,
        attempt: u32,
        code: String,
        category: ErrorCategory,
    },

    /// Retry scheduled
    Retry { src: String, retry: u32, delay_ms: u64 },

    /// Moved to the next source
    Failover { from: String, to: String },

    Play,
    Pause,

    VolumeChange { volume: f64, muted: bool },

    /// Rendition switch
    QualityChange { id: String, height: Option<u32>, bitrate: Option<u64> },

    /// Error surfaced to the host
    Error { code: String, message: String },

    Dispose,
}

/// Analytics event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEventRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Session ID, one per plugin instance
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    #[serde(flatten)]
    pub event: AnalyticsEvent,
}

struct Buffer {
    sequence: u64,
    records: VecDeque<AnalyticsEventRecord>,
}

/// Plugin that keeps a bounded log of lifecycle events
pub struct AnalyticsPlugin {
    session_id: Uuid,
    max_buffer_size: usize,
    buffer: Mutex<Buffer>,
}

impl AnalyticsPlugin {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            max_buffer_size: max_buffer_size.max(1),
            buffer: Mutex::new(Buffer {
                sequence: 0,
                records: VecDeque::new(),
            }),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Record an event
    pub fn record(&self, event: AnalyticsEvent) {
        let mut buffer = self.buffer.lock();
        buffer.sequence += 1;
        let record = AnalyticsEventRecord {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            timestamp: Utc::now(),
            sequence: buffer.sequence,
            event,
        };
        debug!(sequence = record.sequence, event = ?record.event, "Analytics event");

        if buffer.records.len() >= self.max_buffer_size {
            buffer.records.pop_front();
        }
        buffer.records.push_back(record);
    }

    /// Copy of the buffered records
    pub fn events(&self) -> Vec<AnalyticsEventRecord> {
        self.buffer.lock().records.iter().cloned().collect()
    }

    /// Take every buffered record
    pub fn drain(&self) -> Vec<AnalyticsEventRecord> {
        self.buffer.lock().records.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().records.is_empty()
    }
}

impl Default for AnalyticsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for AnalyticsPlugin {
    fn name(&self) -> &str {
        "analytics"
    }

    fn on_init(&self, capabilities: &CapabilitySnapshot) -> PluginResult {
        self.record(AnalyticsEvent::Init {
            native_hls: capabilities.native_hls,
            mse: capabilities.mse,
            os: capabilities.os.to_string(),
        });
        Ok(())
    }

    fn on_source_load_start(&self, attempt: &SourceAttempt) -> PluginResult {
        self.record(AnalyticsEvent::LoadStart {
            src: attempt.src.clone(),
            strategy: attempt.strategy.clone(),
            attempt: attempt.attempt,
        });
        Ok(())
    }

    fn on_source_loaded(&self, attempt: &SourceAttempt) -> PluginResult {
        self.record(AnalyticsEvent::Loaded {
            src: attempt.src.clone(),
            strategy: attempt.strategy.clone().unwrap_or_default(),
            attempt: attempt.attempt,
        });
        Ok(())
    }

    fn on_source_load_failed(&self, attempt: &SourceAttempt, error: &Error) -> PluginResult {
        self.record(AnalyticsEvent::LoadFailed {
            src: attempt.src.clone(),
            attempt: attempt.attempt,
            code: error.error_code().to_string(),
            category: error.category(),
        });
        Ok(())
    }

    fn on_retry(&self, notice: &RetryNotice) -> PluginResult {
        self.record(AnalyticsEvent::Retry {
            src: notice.src.clone(),
            retry: notice.retry,
            delay_ms: notice.delay_ms,
        });
        Ok(())
    }

    fn on_failover(&self, notice: &FailoverNotice) -> PluginResult {
        self.record(AnalyticsEvent::Failover {
            from: notice.from.clone(),
            to: notice.to.clone(),
        });
        Ok(())
    }

    fn on_play(&self) -> PluginResult {
        self.record(AnalyticsEvent::Play);
        Ok(())
    }

    fn on_pause(&self) -> PluginResult {
        self.record(AnalyticsEvent::Pause);
        Ok(())
    }

    fn on_volume_change(&self, volume: f64, muted: bool) -> PluginResult {
        self.record(AnalyticsEvent::VolumeChange { volume, muted });
        Ok(())
    }

    fn on_quality_change(&self, level: &QualityLevel) -> PluginResult {
        self.record(AnalyticsEvent::QualityChange {
            id: level.id.clone(),
            height: level.height,
            bitrate: level.bitrate,
        });
        Ok(())
    }

    fn on_error(&self, error: &Error) -> PluginResult {
        self.record(AnalyticsEvent::Error {
            code: error.error_code().to_string(),
            message: error.to_string(),
        });
        Ok(())
    }

    fn on_dispose(&self) -> PluginResult {
        self.record(AnalyticsEvent::Dispose);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginBus;
    use std::sync::Arc;

    #[test]
    fn test_records_through_bus() {
        let analytics = Arc::new(AnalyticsPlugin::new());
        let bus = PluginBus::new();
        bus.register(analytics.clone());

        bus.play();
        bus.error(&Error::timeout("media load", 30_000));
        bus.time_update(1.0, 10.0);

        let events = analytics.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, AnalyticsEvent::Play);
        assert_eq!(events[1].sequence, 2);
        match &events[1].event {
            AnalyticsEvent::Error { code, .. } => assert_eq!(code, "TIMEOUT"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_bounded_buffer_and_drain() {
        let analytics = AnalyticsPlugin::with_buffer_size(2);
        analytics.record(AnalyticsEvent::Play);
        analytics.record(AnalyticsEvent::Pause);
        analytics.record(AnalyticsEvent::Dispose);

        let drained = analytics.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].event, AnalyticsEvent::Pause);
        assert_eq!(drained[1].sequence, 3);
        assert!(analytics.is_empty());
    }

    #[test]
    fn test_record_serialization() {
        let analytics = AnalyticsPlugin::new();
        analytics.record(AnalyticsEvent::Failover {
            from: "a.m3u8".into(),
            to: "b.mp4".into(),
        });
        let json = serde_json::to_value(&analytics.events()[0]).unwrap();
        assert_eq!(json["event"], "failover");
        assert_eq!(json["to"], "b.mp4");
        assert_eq!(json["session_id"], analytics.session_id().to_string());
    }
}
