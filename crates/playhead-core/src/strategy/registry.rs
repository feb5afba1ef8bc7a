//! Strategy registry and source matching

use super::{
    AdaptiveEngineFactory, DirectStrategy, NativeStrategy, PlaybackStrategy, SegmentedKind,
    SegmentedStrategy,
};
use crate::types::CapabilitySnapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Built-in priorities; higher wins
pub const NATIVE_HLS_PRIORITY: i32 = 100;
pub const HLS_PRIORITY: i32 = 90;
pub const DASH_PRIORITY: i32 = 80;
pub const DIRECT_PRIORITY: i32 = 50;

const HLS_EXTENSIONS: &[&str] = &[".m3u8", ".m3u"];
const DASH_EXTENSIONS: &[&str] = &[".mpd"];
const PROGRESSIVE_EXTENSIONS: &[&str] = &[
    ".mp4", ".m4v", ".webm", ".ogv", ".ogg", ".mov", ".mkv", ".mp3", ".m4a", ".aac", ".wav",
    ".flac", ".opus",
];

/// Transport family inferred from a source URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Hls,
    Dash,
    Progressive,
    Unknown,
}

/// Classify a source by its path suffix, ignoring query and fragment
pub fn classify_source(src: &str) -> SourceKind {
    let path = match Url::parse(src) {
        Ok(url) => url.path().to_lowercase(),
        Err(_) => src
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_lowercase(),
    };

    let matches = |extensions: &[&str]| extensions.iter().any(|ext| path.ends_with(ext));
    if matches(HLS_EXTENSIONS) {
        SourceKind::Hls
    } else if matches(DASH_EXTENSIONS) {
        SourceKind::Dash
    } else if matches(PROGRESSIVE_EXTENSIONS) {
        SourceKind::Progressive
    } else {
        SourceKind::Unknown
    }
}

/// Input to a descriptor's `can_handle` predicate
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub src: &'a str,
    pub capabilities: &'a CapabilitySnapshot,
}

impl ResolveContext<'_> {
    pub fn source_kind(&self) -> SourceKind {
        classify_source(self.src)
    }
}

type CanHandleFn = Arc<dyn Fn(&ResolveContext<'_>) -> bool + Send + Sync>;
type CreateFn = Arc<dyn Fn() -> Arc<dyn PlaybackStrategy> + Send + Sync>;

/// A registered strategy: identity, priority, matcher and constructor
#[derive(Clone)]
pub struct StrategyDescriptor {
    pub id: String,
    pub priority: i32,
    can_handle: CanHandleFn,
    create: CreateFn,
}

impl StrategyDescriptor {
    pub fn new<P, C>(id: impl Into<String>, priority: i32, can_handle: P, create: C) -> Self
    where
        P: Fn(&ResolveContext<'_>) -> bool + Send + Sync + 'static,
        C: Fn() -> Arc<dyn PlaybackStrategy> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            priority,
            can_handle: Arc::new(can_handle),
            create: Arc::new(create),
        }
    }

    pub fn can_handle(&self, ctx: &ResolveContext<'_>) -> bool {
        (self.can_handle)(ctx)
    }

    /// Fresh strategy instance
    pub fn create(&self) -> Arc<dyn PlaybackStrategy> {
        (self.create)()
    }
}

impl std::fmt::Debug for StrategyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyDescriptor")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Third-party engines available to the built-in segmented strategies
#[derive(Clone)]
pub struct EngineSet {
    pub hls: Option<Arc<dyn AdaptiveEngineFactory>>,
    pub dash: Option<Arc<dyn AdaptiveEngineFactory>>,
    /// Timeout for native and direct loads
    pub load_timeout: Duration,
}

impl Default for EngineSet {
    fn default() -> Self {
        Self {
            hls: None,
            dash: None,
            load_timeout: Duration::from_secs(30),
        }
    }
}

/// Ordered set of strategy descriptors
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    descriptors: Vec<StrategyDescriptor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the native, segmented and direct strategies.
    ///
    /// Segmented descriptors are only registered for engines present in
    /// `engines`.
    pub fn with_builtins(engines: EngineSet) -> Self {
        let mut registry = Self::new();
        let timeout = engines.load_timeout;

        // Apple platforms prefer their own HLS stack; elsewhere it is the last
        // resort when no MSE engine can run.
        registry.register(StrategyDescriptor::new(
            NativeStrategy::ID,
            NATIVE_HLS_PRIORITY,
            |ctx| {
                ctx.source_kind() == SourceKind::Hls
                    && ctx.capabilities.native_hls
                    && (ctx.capabilities.os.is_apple() || !ctx.capabilities.mse)
            },
            move || Arc::new(NativeStrategy::new(timeout)) as Arc<dyn PlaybackStrategy>,
        ));

        #[cfg(feature = "hls")]
        if let Some(factory) = engines.hls.clone() {
            registry.register(segmented_descriptor(SegmentedKind::Hls, HLS_PRIORITY, factory));
        }

        #[cfg(feature = "dash")]
        if let Some(factory) = engines.dash.clone() {
            registry.register(segmented_descriptor(SegmentedKind::Dash, DASH_PRIORITY, factory));
        }

        registry.register(StrategyDescriptor::new(
            DirectStrategy::ID,
            DIRECT_PRIORITY,
            |ctx| ctx.source_kind() == SourceKind::Progressive,
            move || Arc::new(DirectStrategy::new(timeout)) as Arc<dyn PlaybackStrategy>,
        ));

        registry
    }

    /// Insert or replace (by id), then order by priority, highest first
    pub fn register(&mut self, descriptor: StrategyDescriptor) {
        debug!(id = %descriptor.id, priority = descriptor.priority, "Registering strategy");
        self.descriptors.retain(|d| d.id != descriptor.id);
        self.descriptors.push(descriptor);
        self.descriptors.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Highest-priority descriptor whose predicate accepts the context
    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<&StrategyDescriptor> {
        self.descriptors.iter().find(|d| d.can_handle(ctx))
    }

    pub fn get(&self, id: &str) -> Option<&StrategyDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(any(feature = "hls", feature = "dash"))]
fn segmented_descriptor(
    kind: SegmentedKind,
    priority: i32,
    factory: Arc<dyn AdaptiveEngineFactory>,
) -> StrategyDescriptor {
    let wanted = match kind {
        SegmentedKind::Hls => SourceKind::Hls,
        SegmentedKind::Dash => SourceKind::Dash,
    };
    StrategyDescriptor::new(
        kind.strategy_id(),
        priority,
        move |ctx| ctx.source_kind() == wanted && ctx.capabilities.mse,
        move || Arc::new(SegmentedStrategy::new(kind, factory.clone())) as Arc<dyn PlaybackStrategy>,
    )
}
