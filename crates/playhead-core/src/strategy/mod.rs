//! Playback strategies
//!
//! A strategy is one way of getting a source onto the media element:
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                  StrategyRegistry                  │
//! │   (source + capabilities) -> StrategyDescriptor    │
//! ├────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────────────┐  ┌─────────┐  │
//! │  │  Native  │   │    Segmented     │  │ Direct  │  │
//! │  │ (src=)   │   │ (HLS/DASH engine)│  │ (files) │  │
//! │  └────┬─────┘   └────────┬─────────┘  └────┬────┘  │
//! │       └──────────────────┼─────────────────┘       │
//! │                   MediaElement                      │
//! └────────────────────────────────────────────────────┘
//! ```

mod direct;
mod native;
pub mod registry;
mod segmented;

pub use direct::DirectStrategy;
pub use native::NativeStrategy;
pub use registry::{
    classify_source, EngineSet, ResolveContext, SourceKind, StrategyDescriptor, StrategyRegistry,
};
pub use segmented::{
    AdaptiveEngine, AdaptiveEngineFactory, AdaptiveEvent, SegmentedKind, SegmentedStrategy,
};

use crate::error::{Error, Result};
use crate::media::{MediaElement, MediaEvent};
use crate::types::{CapabilitySnapshot, QualityLevel};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Callback receiving rendition switches
pub type QualityCallback = Arc<dyn Fn(QualityLevel) + Send + Sync>;

/// Everything a strategy needs for one load attempt
#[derive(Clone)]
pub struct StrategyContext {
    pub src: String,
    pub element: Arc<dyn MediaElement>,
    pub capabilities: CapabilitySnapshot,
    pub cancel: CancellationToken,
    pub on_quality_change: Option<QualityCallback>,
}

impl std::fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyContext")
            .field("src", &self.src)
            .field("capabilities", &self.capabilities)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Capability set shared by every playback backend
#[async_trait]
pub trait PlaybackStrategy: Send + Sync {
    /// Descriptor id this instance was created from
    fn id(&self) -> &str;

    /// Attach the source and resolve once the first frame is loaded.
    ///
    /// Rejects with [`Error::Aborted`] without side effects if the context is
    /// already cancelled. On mid-flight cancellation, timeout or fatal error
    /// the attempt's work is torn down before the error is returned.
    async fn load(&self, ctx: StrategyContext) -> Result<()>;

    /// Release every resource; idempotent and safe before `load` completes
    async fn destroy(&self);

    /// Renditions known so far
    fn quality_levels(&self) -> Vec<QualityLevel>;

    /// Best-effort rendition switch; "auto" restores adaptive selection
    fn set_quality(&self, id: &str);
}

/// Wait for the element to report its first frame.
pub(crate) async fn await_media_ready(
    events: &mut broadcast::Receiver<MediaEvent>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<()> {
    let ready = async {
        loop {
            match events.recv().await {
                Ok(MediaEvent::LoadedData) => return Ok(()),
                Ok(MediaEvent::Error(message)) => return Err(Error::MediaElement(message)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Media event receiver lagged");
                    continue;
                }
                Err(RecvError::Closed) => {
                    return Err(Error::MediaElement("media element went away".into()))
                }
            }
        }
    };

    match timeout {
        Some(limit) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Aborted),
                result = tokio::time::timeout(limit, ready) => result.unwrap_or_else(|_| {
                    Err(Error::timeout("media load", limit.as_millis() as u64))
                }),
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Aborted),
                result = ready => result,
            }
        }
    }
}

/// Source attachment shared by the strategies that play through the
/// element's own `src` (native pass-through and direct files).
pub(crate) struct ElementAttachment {
    timeout: Duration,
    attached: Mutex<Option<(Arc<dyn MediaElement>, String)>>,
}

impl ElementAttachment {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            attached: Mutex::new(None),
        }
    }

    pub(crate) async fn load(&self, ctx: &StrategyContext) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        // Subscribe before touching src so loadeddata cannot be missed.
        let mut events = ctx.element.subscribe();
        ctx.element.set_src(Some(&ctx.src));
        ctx.element.load();
        *self.attached.lock() = Some((ctx.element.clone(), ctx.src.clone()));

        let result = await_media_ready(&mut events, &ctx.cancel, Some(self.timeout)).await;
        if result.is_err() {
            self.detach();
        }
        result
    }

    /// Clear the element's source if it is still ours. A newer attachment
    /// owns the element once it has set its own source.
    pub(crate) fn detach(&self) {
        let Some((element, src)) = self.attached.lock().take() else {
            return;
        };
        if element.src().as_deref() != Some(src.as_str()) {
            debug!(src = %src, "Element already re-attached, leaving it alone");
            return;
        }
        element.set_src(None);
        element.load();
    }
}
