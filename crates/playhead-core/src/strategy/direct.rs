//! Direct progressive files (mp4, webm, ...) played by the element.

use super::{ElementAttachment, PlaybackStrategy, StrategyContext};
use crate::error::Result;
use crate::types::QualityLevel;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct DirectStrategy {
    attachment: ElementAttachment,
}

impl DirectStrategy {
    pub const ID: &'static str = "direct";

    pub fn new(timeout: Duration) -> Self {
        Self {
            attachment: ElementAttachment::new(timeout),
        }
    }
}

#[async_trait]
impl PlaybackStrategy for DirectStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn load(&self, ctx: StrategyContext) -> Result<()> {
        debug!(src = %ctx.src, "Attaching progressive source");
        self.attachment.load(&ctx).await
    }

    async fn destroy(&self) {
        self.attachment.detach();
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        Vec::new()
    }

    fn set_quality(&self, _id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::media::{HeadlessElement, MediaElement, MediaEvent};
    use crate::types::CapabilitySnapshot;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cancel_mid_flight_detaches_before_rejecting() {
        let element = Arc::new(HeadlessElement::new());
        let strategy = DirectStrategy::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let ctx = StrategyContext {
            src: "https://cdn.example.com/movie.mp4".into(),
            element: element.clone(),
            capabilities: CapabilitySnapshot::desktop(),
            cancel,
            on_quality_change: None,
        };
        let err = strategy.load(ctx).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert_eq!(element.src(), None);
        // attach + detach
        assert_eq!(element.load_calls(), 2);

        element.emit(MediaEvent::LoadedData);
        assert!(strategy.quality_levels().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_leaves_newer_source_alone() {
        let element = Arc::new(HeadlessElement::new());
        let strategy = DirectStrategy::new(Duration::from_secs(30));

        let driver = element.clone();
        tokio::spawn(async move {
            while driver.src().is_none() {
                tokio::task::yield_now().await;
            }
            driver.emit(MediaEvent::LoadedData);
        });

        let ctx = StrategyContext {
            src: "https://cdn.example.com/a.mp4".into(),
            element: element.clone(),
            capabilities: CapabilitySnapshot::desktop(),
            cancel: CancellationToken::new(),
            on_quality_change: None,
        };
        strategy.load(ctx).await.unwrap();

        element.set_src(Some("https://cdn.example.com/b.mp4"));
        strategy.destroy().await;
        assert_eq!(element.src().as_deref(), Some("https://cdn.example.com/b.mp4"));
        assert_eq!(element.load_calls(), 1);
    }
}
