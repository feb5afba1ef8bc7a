//! Plugin fan-out
//!
//! Subscribers implement [`Plugin`] and override only the hooks they care
//! about. The [`PluginBus`] calls them synchronously in registration order;
//! a hook that fails or panics is logged with the plugin's name and the
//! lifecycle phase, and the remaining plugins still run.

use crate::error::{Error, ErrorCategory};
use crate::types::{CapabilitySnapshot, LoadRequestId, QualityLevel};
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Result of a plugin hook
pub type PluginResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Lifecycle phases a plugin can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Setup,
    Init,
    SourceLoadStart,
    SourceLoaded,
    SourceLoadFailed,
    Retry,
    Failover,
    Play,
    Pause,
    TimeUpdate,
    VolumeChange,
    QualityChange,
    Error,
    Dispose,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecyclePhase::Setup => "setup",
            LifecyclePhase::Init => "onInit",
            LifecyclePhase::SourceLoadStart => "onSourceLoadStart",
            LifecyclePhase::SourceLoaded => "onSourceLoaded",
            LifecyclePhase::SourceLoadFailed => "onSourceLoadFailed",
            LifecyclePhase::Retry => "onRetry",
            LifecyclePhase::Failover => "onFailover",
            LifecyclePhase::Play => "onPlay",
            LifecyclePhase::Pause => "onPause",
            LifecyclePhase::TimeUpdate => "onTimeUpdate",
            LifecyclePhase::VolumeChange => "onVolumeChange",
            LifecyclePhase::QualityChange => "onQualityChange",
            LifecyclePhase::Error => "onError",
            LifecyclePhase::Dispose => "onDispose",
        };
        f.write_str(name)
    }
}

/// One strategy attempt on one source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAttempt {
    pub request_id: LoadRequestId,
    pub src: String,
    /// None when no strategy could handle the source
    pub strategy: Option<String>,
    /// 1-based attempt number across the whole request
    pub attempt: u32,
    pub total_attempts: u32,
}

/// A failed attempt scheduled for retry
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    pub src: String,
    pub strategy: String,
    /// 0-based retry index on this source
    pub retry: u32,
    pub delay_ms: u64,
    pub category: ErrorCategory,
}

/// Hand-over from an exhausted candidate to the next one
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverNotice {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// A lifecycle observer. Every hook is optional.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    /// Name used in failure logs
    fn name(&self) -> &str;

    /// Called once on registration
    fn setup(&self) -> PluginResult {
        Ok(())
    }

    fn on_init(&self, capabilities: &CapabilitySnapshot) -> PluginResult {
        Ok(())
    }

    fn on_source_load_start(&self, attempt: &SourceAttempt) -> PluginResult {
        Ok(())
    }

    fn on_source_loaded(&self, attempt: &SourceAttempt) -> PluginResult {
        Ok(())
    }

    fn on_source_load_failed(&self, attempt: &SourceAttempt, error: &Error) -> PluginResult {
        Ok(())
    }

    fn on_retry(&self, notice: &RetryNotice) -> PluginResult {
        Ok(())
    }

    fn on_failover(&self, notice: &FailoverNotice) -> PluginResult {
        Ok(())
    }

    fn on_play(&self) -> PluginResult {
        Ok(())
    }

    fn on_pause(&self) -> PluginResult {
        Ok(())
    }

    fn on_time_update(&self, current_time: f64, duration: f64) -> PluginResult {
        Ok(())
    }

    fn on_volume_change(&self, volume: f64, muted: bool) -> PluginResult {
        Ok(())
    }

    fn on_quality_change(&self, level: &QualityLevel) -> PluginResult {
        Ok(())
    }

    fn on_error(&self, error: &Error) -> PluginResult {
        Ok(())
    }

    fn on_dispose(&self) -> PluginResult {
        Ok(())
    }
}

/// Ordered, failure-isolated plugin dispatcher
#[derive(Default)]
pub struct PluginBus {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin and run its `setup` hook
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        invoke(plugin.as_ref(), LifecyclePhase::Setup, |p| p.setup());
        self.plugins.write().push(plugin);
    }

    /// Registered plugin names in dispatch order
    pub fn names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    pub fn clear(&self) {
        self.plugins.write().clear();
    }

    /// Deliver one phase to every plugin
    pub fn dispatch<F>(&self, phase: LifecyclePhase, mut hook: F)
    where
        F: FnMut(&dyn Plugin) -> PluginResult,
    {
        // Snapshot so a hook may register plugins without deadlocking.
        let plugins = self.plugins.read().clone();
        for plugin in &plugins {
            invoke(plugin.as_ref(), phase, &mut hook);
        }
    }

    pub fn init(&self, capabilities: &CapabilitySnapshot) {
        self.dispatch(LifecyclePhase::Init, |p| p.on_init(capabilities));
    }

    pub fn source_load_start(&self, attempt: &SourceAttempt) {
        self.dispatch(LifecyclePhase::SourceLoadStart, |p| {
            p.on_source_load_start(attempt)
        });
    }

    pub fn source_loaded(&self, attempt: &SourceAttempt) {
        self.dispatch(LifecyclePhase::SourceLoaded, |p| p.on_source_loaded(attempt));
    }

    pub fn source_load_failed(&self, attempt: &SourceAttempt, error: &Error) {
        self.dispatch(LifecyclePhase::SourceLoadFailed, |p| {
            p.on_source_load_failed(attempt, error)
        });
    }

    pub fn retry(&self, notice: &RetryNotice) {
        self.dispatch(LifecyclePhase::Retry, |p| p.on_retry(notice));
    }

    pub fn failover(&self, notice: &FailoverNotice) {
        self.dispatch(LifecyclePhase::Failover, |p| p.on_failover(notice));
    }

    pub fn play(&self) {
        self.dispatch(LifecyclePhase::Play, |p| p.on_play());
    }

    pub fn pause(&self) {
        self.dispatch(LifecyclePhase::Pause, |p| p.on_pause());
    }

    pub fn time_update(&self, current_time: f64, duration: f64) {
        self.dispatch(LifecyclePhase::TimeUpdate, |p| {
            p.on_time_update(current_time, duration)
        });
    }

    pub fn volume_change(&self, volume: f64, muted: bool) {
        self.dispatch(LifecyclePhase::VolumeChange, |p| p.on_volume_change(volume, muted));
    }

    pub fn quality_change(&self, level: &QualityLevel) {
        self.dispatch(LifecyclePhase::QualityChange, |p| p.on_quality_change(level));
    }

    pub fn error(&self, error: &Error) {
        self.dispatch(LifecyclePhase::Error, |p| p.on_error(error));
    }

    pub fn dispose(&self) {
        self.dispatch(LifecyclePhase::Dispose, |p| p.on_dispose());
    }
}

fn invoke<F>(plugin: &dyn Plugin, phase: LifecyclePhase, hook: F)
where
    F: FnOnce(&dyn Plugin) -> PluginResult,
{
    match panic::catch_unwind(AssertUnwindSafe(|| hook(plugin))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(plugin = plugin.name(), phase = %phase, error = %e, "Plugin hook failed"),
        Err(payload) => warn!(
            plugin = plugin.name(),
            phase = %phase,
            panic = panic_message(payload.as_ref()),
            "Plugin hook panicked"
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
