//! Native pass-through: the element plays the source itself (HLS on Apple
//! platforms).

use super::{ElementAttachment, PlaybackStrategy, StrategyContext};
use crate::error::Result;
use crate::types::QualityLevel;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct NativeStrategy {
    id: String,
    attachment: ElementAttachment,
}

impl NativeStrategy {
    pub const ID: &'static str = "native";

    pub fn new(timeout: Duration) -> Self {
        Self::with_id(Self::ID, timeout)
    }

    pub fn with_id(id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            attachment: ElementAttachment::new(timeout),
        }
    }
}

#[async_trait]
impl PlaybackStrategy for NativeStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load(&self, ctx: StrategyContext) -> Result<()> {
        debug!(src = %ctx.src, "Attaching source natively");
        self.attachment.load(&ctx).await
    }

    async fn destroy(&self) {
        self.attachment.detach();
    }

    // The platform player picks renditions on its own.
    fn quality_levels(&self) -> Vec<QualityLevel> {
        Vec::new()
    }

    fn set_quality(&self, _id: &str) {}
}
