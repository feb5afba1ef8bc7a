//! Runtime capability detection

use crate::error::Result;
use crate::types::CapabilitySnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Produces a snapshot of what the runtime can do.
///
/// Implemented by the host; detection heuristics live outside this crate.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn resolve(&self) -> Result<CapabilitySnapshot>;
}

/// Probe returning a fixed snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub CapabilitySnapshot);

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn resolve(&self) -> Result<CapabilitySnapshot> {
        Ok(self.0)
    }
}

/// Memoizes a probe: the first caller resolves, concurrent callers wait for
/// that same resolution, later callers read the stored snapshot.
pub struct CapabilityCache {
    probe: Arc<dyn CapabilityProbe>,
    snapshot: Mutex<Option<CapabilitySnapshot>>,
}

impl CapabilityCache {
    pub fn new(probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            probe,
            snapshot: Mutex::new(None),
        }
    }

    /// Get the snapshot, probing on first use
    pub async fn get(&self) -> Result<CapabilitySnapshot> {
        let mut slot = self.snapshot.lock().await;
        if let Some(snapshot) = *slot {
            return Ok(snapshot);
        }
        let snapshot = self.probe.resolve().await?;
        debug!(?snapshot, "Capabilities resolved");
        *slot = Some(snapshot);
        Ok(snapshot)
    }

    /// Snapshot if already resolved
    pub fn peek(&self) -> Option<CapabilitySnapshot> {
        self.snapshot.try_lock().ok().and_then(|slot| *slot)
    }

    /// Forget the stored snapshot
    pub async fn invalidate(&self) {
        *self.snapshot.lock().await = None;
    }
}
