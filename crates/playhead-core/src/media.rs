//! Media element surface
//!
//! The element is owned by the host (a `<video>` tag, a native player view,
//! a test double). Strategies drive it through [`MediaElement`] and observe
//! it through the broadcast of [`MediaEvent`]s.

use crate::drm::MediaKeys;
use crate::error::Result;
use crate::types::VideoConfig;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Standard media events
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadStart,
    LoadedMetadata,
    LoadedData,
    Play,
    Pause,
    TimeUpdate,
    Progress,
    DurationChange,
    VolumeChange,
    Ended,
    /// The element failed to load or decode its source
    Error(String),
    /// Encrypted init data encountered; a license is needed
    Encrypted(EncryptedInit),
}

/// Payload of an encrypted event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInit {
    /// e.g. "cenc", "keyids", "skd"
    pub init_data_type: String,
    pub init_data: Bytes,
}

/// The host's media element
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn src(&self) -> Option<String>;

    /// Set or clear the source; clearing detaches any loaded media
    fn set_src(&self, src: Option<&str>);

    /// Begin (re)loading the current source
    fn load(&self);

    /// Apply autoplay/muted/loop/playsInline/poster
    fn apply_config(&self, config: &VideoConfig);

    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn volume(&self) -> f64;
    fn muted(&self) -> bool;

    /// End of the furthest buffered range in seconds
    fn buffered_end(&self) -> f64;

    /// Subscribe to the element's events
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Attach or detach a content protection module
    async fn set_media_keys(&self, keys: Option<Arc<dyn MediaKeys>>) -> Result<()>;
}

/// Buffered amount as a percentage of duration, 0 when duration is unknown
pub fn buffered_percent(element: &dyn MediaElement) -> f64 {
    let duration = element.duration();
    if !duration.is_finite() || duration <= 0.0 {
        return 0.0;
    }
    (element.buffered_end() / duration * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Default)]
struct HeadlessState {
    src: Option<String>,
    config: VideoConfig,
    current_time: f64,
    duration: f64,
    volume: f64,
    muted: bool,
    buffered_end: f64,
    has_media_keys: bool,
    load_calls: u32,
}

/// In-memory element for hosts without a rendering surface.
///
/// Records what strategies do to it and lets the host inject events with
/// [`HeadlessElement::emit`].
pub struct HeadlessElement {
    state: Mutex<HeadlessState>,
    events: broadcast::Sender<MediaEvent>,
}

impl HeadlessElement {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(HeadlessState {
                volume: 1.0,
                ..Default::default()
            }),
            events,
        }
    }

    /// Deliver an event to every subscriber
    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_current_time(&self, time: f64) {
        self.state.lock().current_time = time;
    }

    pub fn set_duration(&self, duration: f64) {
        self.state.lock().duration = duration;
    }

    pub fn set_buffered_end(&self, end: f64) {
        self.state.lock().buffered_end = end;
    }

    pub fn set_volume(&self, volume: f64, muted: bool) {
        let mut state = self.state.lock();
        state.volume = volume;
        state.muted = muted;
    }

    pub fn config(&self) -> VideoConfig {
        self.state.lock().config.clone()
    }

    pub fn has_media_keys(&self) -> bool {
        self.state.lock().has_media_keys
    }

    pub fn load_calls(&self) -> u32 {
        self.state.lock().load_calls
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for HeadlessElement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaElement for HeadlessElement {
    fn src(&self) -> Option<String> {
        self.state.lock().src.clone()
    }

    fn set_src(&self, src: Option<&str>) {
        self.state.lock().src = src.map(str::to_string);
    }

    fn load(&self) {
        self.state.lock().load_calls += 1;
    }

    fn apply_config(&self, config: &VideoConfig) {
        let mut state = self.state.lock();
        state.muted = config.muted;
        state.config = config.clone();
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    fn muted(&self) -> bool {
        self.state.lock().muted
    }

    fn buffered_end(&self) -> f64 {
        self.state.lock().buffered_end
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    async fn set_media_keys(&self, keys: Option<Arc<dyn MediaKeys>>) -> Result<()> {
        self.state.lock().has_media_keys = keys.is_some();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_percent() {
        let element = HeadlessElement::new();
        assert_eq!(buffered_percent(&element), 0.0);

        element.set_duration(200.0);
        element.set_buffered_end(50.0);
        assert_eq!(buffered_percent(&element), 25.0);

        element.set_buffered_end(400.0);
        assert_eq!(buffered_percent(&element), 100.0);
    }

    #[tokio::test]
    async fn test_headless_records_config_and_events() {
        let element = HeadlessElement::new();
        let mut rx = element.subscribe();

        element.apply_config(&VideoConfig {
            muted: true,
            plays_inline: true,
            ..Default::default()
        });
        assert!(element.muted());
        assert!(element.config().plays_inline);

        element.emit(MediaEvent::Play);
        assert_eq!(rx.recv().await.unwrap(), MediaEvent::Play);
    }
}
