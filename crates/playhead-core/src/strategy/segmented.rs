//! Segmented playback through a third-party adaptive engine (HLS or DASH).
//!
//! The engine does the adaptive bitrate work; this strategy only attaches it,
//! learns its renditions, forwards its level switches and turns its first
//! fatal error into a load rejection.

use super::{await_media_ready, PlaybackStrategy, QualityCallback, StrategyContext};
use crate::error::{Error, Result};
use crate::media::MediaElement;
use crate::types::QualityLevel;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Notifications from an adaptive engine
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptiveEvent {
    /// Manifest parsed; renditions are known
    ManifestParsed { levels: Vec<QualityLevel> },
    /// The engine switched to another rendition
    LevelSwitched { id: String },
    /// Unrecoverable engine error
    FatalError(String),
}

/// A live third-party engine instance bound to one element
pub trait AdaptiveEngine: Send + Sync {
    /// Attach to the element and start loading `src`
    fn attach(
        &self,
        element: Arc<dyn MediaElement>,
        src: &str,
    ) -> Result<mpsc::UnboundedReceiver<AdaptiveEvent>>;

    /// Pin a rendition, or `None` for automatic selection
    fn set_level(&self, id: Option<&str>);

    /// Abort requests and release the engine
    fn destroy(&self);
}

/// Creates engine instances
pub trait AdaptiveEngineFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Arc<dyn AdaptiveEngine>>;
}

/// Transport handled by a segmented strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentedKind {
    Hls,
    Dash,
}

impl SegmentedKind {
    pub fn strategy_id(&self) -> &'static str {
        match self {
            SegmentedKind::Hls => "hls",
            SegmentedKind::Dash => "dash",
        }
    }
}

#[derive(Default)]
struct Running {
    engine: Option<Arc<dyn AdaptiveEngine>>,
    pump: Option<JoinHandle<()>>,
}

pub struct SegmentedStrategy {
    kind: SegmentedKind,
    factory: Arc<dyn AdaptiveEngineFactory>,
    levels: Arc<Mutex<Vec<QualityLevel>>>,
    running: Mutex<Running>,
}

impl SegmentedStrategy {
    pub fn new(kind: SegmentedKind, factory: Arc<dyn AdaptiveEngineFactory>) -> Self {
        Self {
            kind,
            factory,
            levels: Arc::new(Mutex::new(Vec::new())),
            running: Mutex::new(Running::default()),
        }
    }

    fn teardown(&self) {
        let running = std::mem::take(&mut *self.running.lock());
        if let Some(pump) = running.pump {
            pump.abort();
        }
        if let Some(engine) = running.engine {
            engine.destroy();
        }
    }
}

/// Drain engine events for the lifetime of the attachment. Only the first
/// fatal error is reported; later ones are dropped.
async fn pump_engine_events(
    mut events: mpsc::UnboundedReceiver<AdaptiveEvent>,
    levels: Arc<Mutex<Vec<QualityLevel>>>,
    on_quality_change: Option<QualityCallback>,
    fatal_tx: oneshot::Sender<String>,
) {
    let mut fatal_tx = Some(fatal_tx);
    while let Some(event) = events.recv().await {
        match event {
            AdaptiveEvent::ManifestParsed { levels: parsed } => {
                debug!(count = parsed.len(), "Renditions parsed");
                *levels.lock() = parsed;
            }
            AdaptiveEvent::LevelSwitched { id } => {
                let level = levels.lock().iter().find(|l| l.id == id).cloned();
                match (level, &on_quality_change) {
                    (Some(level), Some(callback)) => callback(level),
                    (None, _) => debug!(level = %id, "Switched to unlisted rendition"),
                    _ => {}
                }
            }
            AdaptiveEvent::FatalError(message) => match fatal_tx.take() {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => debug!(%message, "Ignoring repeated fatal engine error"),
            },
        }
    }
}

#[async_trait]
impl PlaybackStrategy for SegmentedStrategy {
    fn id(&self) -> &str {
        self.kind.strategy_id()
    }

    async fn load(&self, ctx: StrategyContext) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        let engine = self.factory.create()?;
        let mut media_events = ctx.element.subscribe();
        let engine_events = match engine.attach(ctx.element.clone(), &ctx.src) {
            Ok(rx) => rx,
            Err(e) => {
                engine.destroy();
                return Err(e);
            }
        };
        debug!(engine = self.factory.name(), src = %ctx.src, "Adaptive engine attached");

        let (fatal_tx, mut fatal_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_engine_events(
            engine_events,
            self.levels.clone(),
            ctx.on_quality_change.clone(),
            fatal_tx,
        ));
        {
            let mut running = self.running.lock();
            running.engine = Some(engine);
            running.pump = Some(pump);
        }

        let result = tokio::select! {
            ready = await_media_ready(&mut media_events, &ctx.cancel, None) => ready,
            fatal = &mut fatal_rx => match fatal {
                Ok(message) => Err(Error::Engine(message)),
                // Pump ended without a fatal error: the engine closed its channel.
                Err(_) => Err(Error::Engine(format!("{} engine stopped", self.factory.name()))),
            },
        };

        if let Err(ref e) = result {
            if !e.is_cancellation() {
                warn!(engine = self.factory.name(), error = %e, "Adaptive engine load failed");
            }
            self.teardown();
        }
        result
    }

    async fn destroy(&self) {
        self.teardown();
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        self.levels.lock().clone()
    }

    fn set_quality(&self, id: &str) {
        let running = self.running.lock();
        let Some(engine) = running.engine.as_ref() else {
            return;
        };
        if id == "auto" {
            engine.set_level(None);
        } else if self.levels.lock().iter().any(|l| l.id == id) {
            engine.set_level(Some(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{HeadlessElement, MediaEvent};
    use crate::types::CapabilitySnapshot;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct ScriptedEngine {
        tx: Mutex<Option<mpsc::UnboundedSender<AdaptiveEvent>>>,
        destroyed: AtomicU32,
        pinned: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedEngine {
        fn send(&self, event: AdaptiveEvent) {
            if let Some(tx) = self.tx.lock().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    impl AdaptiveEngine for ScriptedEngine {
        fn attach(
            &self,
            _element: Arc<dyn MediaElement>,
            _src: &str,
        ) -> Result<mpsc::UnboundedReceiver<AdaptiveEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.tx.lock() = Some(tx);
            Ok(rx)
        }

        fn set_level(&self, id: Option<&str>) {
            self.pinned.lock().push(id.map(str::to_string));
        }

        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedFactory(Arc<ScriptedEngine>);

    impl AdaptiveEngineFactory for ScriptedFactory {
        fn name(&self) -> &str {
            "scripted"
        }

        fn create(&self) -> Result<Arc<dyn AdaptiveEngine>> {
            Ok(self.0.clone())
        }
    }

    fn setup() -> (Arc<ScriptedEngine>, SegmentedStrategy, Arc<HeadlessElement>) {
        let engine = Arc::new(ScriptedEngine::default());
        let strategy =
            SegmentedStrategy::new(SegmentedKind::Hls, Arc::new(ScriptedFactory(engine.clone())));
        (engine, strategy, Arc::new(HeadlessElement::new()))
    }

    fn context(element: Arc<HeadlessElement>, callback: Option<QualityCallback>) -> StrategyContext {
        StrategyContext {
            src: "https://cdn.example.com/vod/master.m3u8".into(),
            element,
            capabilities: CapabilitySnapshot::desktop(),
            cancel: CancellationToken::new(),
            on_quality_change: callback,
        }
    }

    #[tokio::test]
    async fn test_levels_and_quality_forwarding() {
        let (engine, strategy, element) = setup();
        let switched = Arc::new(Mutex::new(Vec::new()));
        let sink = switched.clone();
        let callback: QualityCallback = Arc::new(move |level| sink.lock().push(level));

        let driver = {
            let engine = engine.clone();
            let element = element.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                engine.send(AdaptiveEvent::ManifestParsed {
                    levels: vec![
                        QualityLevel::with_height("0", 360),
                        QualityLevel::with_height("1", 720),
                    ],
                });
                tokio::task::yield_now().await;
                element.emit(MediaEvent::LoadedData);
            })
        };

        strategy.load(context(element, Some(callback))).await.unwrap();
        driver.await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(strategy.quality_levels().len(), 2);

        engine.send(AdaptiveEvent::LevelSwitched { id: "1".into() });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(switched.lock()[0].label, "720p");

        strategy.set_quality("0");
        strategy.set_quality("missing");
        strategy.set_quality("auto");
        assert_eq!(*engine.pinned.lock(), vec![Some("0".to_string()), None]);

        strategy.destroy().await;
        strategy.destroy().await;
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_fatal_error_rejects_once() {
        let (engine, strategy, element) = setup();

        let driver = engine.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            driver.send(AdaptiveEvent::FatalError("networkError: manifestLoadError".into()));
            driver.send(AdaptiveEvent::FatalError("second fatal".into()));
        });

        let err = strategy.load(context(element, None)).await.unwrap_err();
        match err {
            Error::Engine(message) => assert!(message.contains("manifestLoadError")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_tears_down_engine() {
        let (engine, strategy, element) = setup();
        let ctx = context(element, None);
        let cancel = ctx.cancel.clone();

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });

        let err = strategy.load(ctx).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 1);
        assert!(strategy.running.lock().engine.is_none());
    }
}
