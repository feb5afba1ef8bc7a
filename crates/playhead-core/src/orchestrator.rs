//! Load Orchestrator - the playback engine's control surface
//!
//! Coordinates:
//! - Capability resolution (once per engine)
//! - DRM negotiation before any strategy attaches
//! - Strategy resolution per candidate source
//! - Retries with backoff and failover across candidates
//! - Supersession of older loads by newer ones
//! - Lifecycle fan-out to plugins and event subscribers

use crate::capability::{CapabilityCache, CapabilityProbe};
use crate::drm::{ContentProtection, DrmConfig, DrmNegotiator, DrmSession};
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::media::MediaElement;
use crate::plugin::{FailoverNotice, Plugin, PluginBus, RetryNotice, SourceAttempt};
use crate::retry::classify_error;
use crate::strategy::{
    AdaptiveEngineFactory, EngineSet, PlaybackStrategy, QualityCallback, ResolveContext,
    StrategyContext, StrategyDescriptor, StrategyRegistry,
};
use crate::telemetry::{TelemetryPump, TelemetrySink};
use crate::types::{CapabilitySnapshot, EngineConfig, LoadRequest, LoadRequestId, QualityLevel};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What the engine currently has attached to the element
#[derive(Default)]
struct ActiveState {
    /// The one live strategy instance
    handle: Option<Arc<dyn PlaybackStrategy>>,
    /// The one live DRM session
    drm: Option<Arc<DrmSession>>,
    strategy_id: Option<String>,
    source: Option<String>,
    /// The load currently running, if any
    in_flight: Option<InFlight>,
}

/// Handle on a running load
struct InFlight {
    id: LoadRequestId,
    /// Cancels the load's strategy work
    cancel: CancellationToken,
    /// Fires once the load has returned and released the element
    done: CancellationToken,
}

impl InFlight {
    /// Cancel the load and wait until it has stopped touching the element
    async fn interrupt(self) {
        self.cancel.cancel();
        self.done.cancelled().await;
    }
}

/// A candidate source paired with the strategy resolved for it
struct CandidateResolution {
    src: String,
    descriptor: Option<StrategyDescriptor>,
}

/// Adaptive streaming engine bound to one media element
pub struct LoadOrchestrator {
    /// The host's media element
    element: Arc<dyn MediaElement>,
    /// Engine configuration
    config: EngineConfig,
    /// Strategy descriptors
    registry: RwLock<StrategyRegistry>,
    /// Memoized runtime capabilities
    capabilities: CapabilityCache,
    /// Key-system negotiation, if the runtime has content protection
    drm: Option<DrmNegotiator>,
    /// Lifecycle subscribers
    plugins: Arc<PluginBus>,
    /// Engine event broadcaster
    events: broadcast::Sender<EngineEvent>,
    /// Generation counter; a load is superseded once this moves past its id
    request_id: Arc<AtomicU64>,
    disposed: AtomicBool,
    /// Set once capabilities are resolved and Ready was emitted
    ready: OnceCell<CapabilitySnapshot>,
    state: Mutex<ActiveState>,
    telemetry: Mutex<Option<TelemetryPump>>,
}

impl LoadOrchestrator {
    /// Create an engine with the built-in native and direct strategies
    pub fn new(
        element: Arc<dyn MediaElement>,
        probe: Arc<dyn CapabilityProbe>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let registry = StrategyRegistry::with_builtins(EngineSet {
            load_timeout: config.load_timeout(),
            ..Default::default()
        });

        Self {
            element,
            registry: RwLock::new(registry),
            capabilities: CapabilityCache::new(probe),
            drm: None,
            plugins: Arc::new(PluginBus::new()),
            events,
            request_id: Arc::new(AtomicU64::new(0)),
            disposed: AtomicBool::new(false),
            ready: OnceCell::new(),
            state: Mutex::new(ActiveState::default()),
            telemetry: Mutex::new(None),
            config,
        }
    }

    /// Register the segmented HLS/DASH strategies backed by these engines
    pub fn with_adaptive_engines(
        self,
        hls: Option<Arc<dyn AdaptiveEngineFactory>>,
        dash: Option<Arc<dyn AdaptiveEngineFactory>>,
    ) -> Self {
        let registry = StrategyRegistry::with_builtins(EngineSet {
            hls,
            dash,
            load_timeout: self.config.load_timeout(),
        });
        *self.registry.write() = registry;
        self
    }

    /// Enable DRM through the host's content protection module
    pub fn with_content_protection(self, protection: Arc<dyn ContentProtection>) -> Self {
        self.with_drm_client(protection, reqwest::Client::new())
    }

    /// Enable DRM with a caller-configured HTTP client for license requests
    pub fn with_drm_client(
        mut self,
        protection: Arc<dyn ContentProtection>,
        client: reqwest::Client,
    ) -> Self {
        self.drm = Some(
            DrmNegotiator::new(protection, client).with_license_timeout(self.config.license_timeout()),
        );
        self
    }

    /// Resolve capabilities and emit Ready. Idempotent; concurrent callers
    /// share one resolution.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_usable()?;
        self.ensure_initialized().await?;
        self.ensure_usable()
    }

    /// Load a source with fallbacks, retrying and failing over as needed.
    ///
    /// Resolves once a strategy has the first frame loaded. Rejects with
    /// [`Error::Superseded`] when a newer load was issued, [`Error::Aborted`]
    /// when the request's token fired, [`Error::Disposed`] after dispose,
    /// a DRM error when negotiation failed, or [`Error::AllCandidatesFailed`].
    #[instrument(skip_all, fields(src = %request.src, request_id = tracing::field::Empty))]
    pub async fn load_source(&self, request: LoadRequest) -> Result<()> {
        self.ensure_usable()?;

        let id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("request_id", id);

        let cancel = request.cancel.child_token();
        let done = CancellationToken::new();
        let _finished = done.clone().drop_guard();
        let previous = self.state.lock().in_flight.replace(InFlight {
            id,
            cancel: cancel.clone(),
            done,
        });
        if let Some(previous) = previous {
            debug!(previous_id = previous.id, "Superseding in-flight load");
            previous.interrupt().await;
        }

        let result = self.run_load(id, &request, &cancel).await;

        {
            let mut state = self.state.lock();
            if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
                state.in_flight = None;
            }
        }
        result
    }

    async fn run_load(
        &self,
        id: LoadRequestId,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let capabilities = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.interrupted(id, cancel)),
            snapshot = self.ensure_initialized() => snapshot?,
        };
        self.checkpoint(id, cancel)?;

        self.teardown_active().await;
        self.checkpoint(id, cancel)?;

        self.element.apply_config(&self.config.video);

        if let Some(drm) = request.drm.as_ref().filter(|d| d.is_configured()) {
            self.attach_drm(id, drm, cancel).await?;
        }

        let policy = request
            .retry
            .clone()
            .unwrap_or_else(|| self.config.retry.clone())
            .normalized();

        let candidates = self.resolve_candidates(request, &capabilities);
        let total_attempts: u32 = candidates
            .iter()
            .map(|c| match c.descriptor {
                Some(_) => policy.max_retries + 1,
                None => 1,
            })
            .sum();

        info!(
            candidates = candidates.len(),
            total_attempts,
            "Loading source"
        );

        let mut attempt_number = 0u32;
        let mut last_error = String::from("no playable source provided");

        for (index, candidate) in candidates.iter().enumerate() {
            self.checkpoint(id, cancel)?;

            match &candidate.descriptor {
                None => {
                    attempt_number += 1;
                    let error = Error::unsupported(&candidate.src);
                    debug!(src = %candidate.src, "No strategy for source");
                    let attempt = SourceAttempt {
                        request_id: id,
                        src: candidate.src.clone(),
                        strategy: None,
                        attempt: attempt_number,
                        total_attempts,
                    };
                    self.plugins.source_load_failed(&attempt, &error);
                    last_error = error.to_string();
                }
                Some(descriptor) => {
                    let mut retry = 0u32;
                    loop {
                        self.checkpoint(id, cancel)?;
                        attempt_number += 1;
                        let attempt = SourceAttempt {
                            request_id: id,
                            src: candidate.src.clone(),
                            strategy: Some(descriptor.id.clone()),
                            attempt: attempt_number,
                            total_attempts,
                        };

                        let error = match self
                            .try_strategy(id, descriptor, &attempt, &capabilities, cancel)
                            .await
                        {
                            Ok(()) => return Ok(()),
                            Err(e) if e.is_cancellation() => return Err(e),
                            Err(e) => e,
                        };

                        let category = classify_error(&error);
                        self.plugins.source_load_failed(&attempt, &error);
                        last_error = error.to_string();

                        if !policy.should_retry(category, retry) {
                            debug!(src = %candidate.src, %category, "Not retrying");
                            break;
                        }

                        let delay_ms = policy.delay_ms(retry);
                        warn!(
                            src = %candidate.src,
                            strategy = %descriptor.id,
                            retry,
                            delay_ms,
                            error = %error,
                            "Attempt failed, retrying"
                        );
                        self.plugins.retry(&RetryNotice {
                            src: candidate.src.clone(),
                            strategy: descriptor.id.clone(),
                            retry,
                            delay_ms,
                            category,
                        });
                        self.emit(EngineEvent::Retry {
                            src: candidate.src.clone(),
                            attempt: attempt_number,
                            delay_ms,
                            reason: last_error.clone(),
                        });

                        self.backoff(id, delay_ms, cancel).await?;
                        retry += 1;
                    }
                }
            }

            if let Some(next) = candidates.get(index + 1) {
                warn!(from = %candidate.src, to = %next.src, "Failing over");
                let notice = FailoverNotice {
                    from: candidate.src.clone(),
                    to: next.src.clone(),
                    reason: last_error.clone(),
                };
                self.plugins.failover(&notice);
                self.emit(EngineEvent::Failover {
                    from: notice.from,
                    to: notice.to,
                    reason: notice.reason,
                });
            }
        }

        self.checkpoint(id, cancel)?;
        let error = Error::AllCandidatesFailed {
            attempts: total_attempts,
            last_error,
        };
        warn!(error = %error, "Load failed");
        self.report_fatal(&error);
        Err(error)
    }

    /// One attempt with a fresh strategy instance. A failed instance is
    /// destroyed exactly once; a successful one becomes the active handle.
    async fn try_strategy(
        &self,
        id: LoadRequestId,
        descriptor: &StrategyDescriptor,
        attempt: &SourceAttempt,
        capabilities: &CapabilitySnapshot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.plugins.source_load_start(attempt);
        self.emit(EngineEvent::LoadStart {
            request_id: id,
            src: attempt.src.clone(),
            strategy: descriptor.id.clone(),
            attempt: attempt.attempt,
            total_attempts: attempt.total_attempts,
        });

        let instance = descriptor.create();
        let ctx = StrategyContext {
            src: attempt.src.clone(),
            element: self.element.clone(),
            capabilities: *capabilities,
            cancel: cancel.clone(),
            on_quality_change: Some(self.quality_callback(id)),
        };

        if let Err(error) = instance.load(ctx).await {
            instance.destroy().await;
            if error.is_cancellation() || cancel.is_cancelled() || !self.is_current(id) {
                return Err(self.interrupted(id, cancel));
            }
            return Err(error);
        }

        let adopted = {
            let mut state = self.state.lock();
            if self.checkpoint(id, cancel).is_ok() {
                state.handle = Some(instance.clone());
                state.strategy_id = Some(descriptor.id.clone());
                state.source = Some(attempt.src.clone());
                true
            } else {
                false
            }
        };
        if !adopted {
            instance.destroy().await;
            return Err(self.interrupted(id, cancel));
        }

        info!(src = %attempt.src, strategy = %descriptor.id, "Source loaded");
        self.plugins.source_loaded(attempt);
        self.emit(EngineEvent::LoadEnd {
            request_id: id,
            src: attempt.src.clone(),
            strategy: descriptor.id.clone(),
        });
        Ok(())
    }

    async fn attach_drm(
        &self,
        id: LoadRequestId,
        drm: &DrmConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let negotiated = match &self.drm {
            Some(negotiator) => negotiator.negotiate(drm, self.element.clone(), cancel).await,
            None => Err(Error::KeySystemUnavailable {
                tried: drm.key_systems.iter().map(|k| k.key_system.clone()).collect(),
                last: "content protection is not available on this runtime".into(),
            }),
        };

        let session = match negotiated {
            Ok(session) => Arc::new(session),
            Err(e) => {
                if e.is_cancellation() || cancel.is_cancelled() || !self.is_current(id) {
                    return Err(self.interrupted(id, cancel));
                }
                warn!(error = %e, "DRM negotiation failed");
                self.report_fatal(&e);
                return Err(e);
            }
        };

        let adopted = {
            let mut state = self.state.lock();
            if self.checkpoint(id, cancel).is_ok() {
                state.drm = Some(session.clone());
                true
            } else {
                false
            }
        };
        if !adopted {
            session.destroy().await;
            return Err(self.interrupted(id, cancel));
        }
        Ok(())
    }

    fn resolve_candidates(
        &self,
        request: &LoadRequest,
        capabilities: &CapabilitySnapshot,
    ) -> Vec<CandidateResolution> {
        let registry = self.registry.read();
        request
            .candidates()
            .into_iter()
            .map(|src| {
                let descriptor = registry
                    .resolve(&ResolveContext {
                        src: &src,
                        capabilities,
                    })
                    .cloned();
                debug!(
                    src = %src,
                    strategy = descriptor.as_ref().map(|d| d.id.as_str()).unwrap_or("none"),
                    "Resolved candidate"
                );
                CandidateResolution { src, descriptor }
            })
            .collect()
    }

    async fn backoff(&self, id: LoadRequestId, delay_ms: u64, cancel: &CancellationToken) -> Result<()> {
        if delay_ms > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
            }
        }
        self.checkpoint(id, cancel)
    }

    /// Renditions of the active strategy
    pub fn quality_levels(&self) -> Result<Vec<QualityLevel>> {
        self.ensure_usable()?;
        let handle = self.state.lock().handle.clone();
        Ok(handle.map(|h| h.quality_levels()).unwrap_or_default())
    }

    /// Switch rendition; "auto" restores adaptive selection
    pub fn set_quality(&self, id: &str) -> Result<()> {
        self.ensure_usable()?;
        let handle = self.state.lock().handle.clone();
        if let Some(handle) = handle {
            handle.set_quality(id);
        }
        Ok(())
    }

    /// Stop playback and supersede any in-flight load, keeping the engine
    /// usable.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<()> {
        self.ensure_usable()?;
        self.interrupt_in_flight().await;
        self.teardown_active().await;
        Ok(())
    }

    /// Tear everything down and mark the engine unusable
    #[instrument(skip(self))]
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(Error::Disposed);
        }

        // Pending coalesced notifications go before the listeners do.
        if let Some(telemetry) = self.telemetry.lock().take() {
            telemetry.stop();
        }
        self.interrupt_in_flight().await;
        self.teardown_active().await;

        self.plugins.dispose();
        self.plugins.clear();
        self.capabilities.invalidate().await;
        info!("Engine disposed");
        Ok(())
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> Result<broadcast::Receiver<EngineEvent>> {
        self.ensure_usable()?;
        Ok(self.events.subscribe())
    }

    /// Add or replace (by id) a strategy descriptor
    pub fn register_strategy(&self, descriptor: StrategyDescriptor) -> Result<()> {
        self.ensure_usable()?;
        self.registry.write().register(descriptor);
        Ok(())
    }

    /// Add a lifecycle subscriber
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.ensure_usable()?;
        self.plugins.register(plugin);
        Ok(())
    }

    /// Id of the active strategy
    pub fn current_strategy_id(&self) -> Result<Option<String>> {
        self.ensure_usable()?;
        Ok(self.state.lock().strategy_id.clone())
    }

    /// Source the active strategy is playing
    pub fn current_source(&self) -> Result<Option<String>> {
        self.ensure_usable()?;
        Ok(self.state.lock().source.clone())
    }

    /// Negotiated key system of the active DRM session
    pub fn current_key_system(&self) -> Result<Option<String>> {
        self.ensure_usable()?;
        Ok(self
            .state
            .lock()
            .drm
            .as_ref()
            .map(|d| d.key_system().to_string()))
    }

    /// Latest assigned load request id
    pub fn request_id(&self) -> LoadRequestId {
        self.request_id.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn is_current(&self, id: LoadRequestId) -> bool {
        self.request_id.load(Ordering::SeqCst) == id
    }

    /// Disposal, then supersession, then the caller's abort
    fn checkpoint(&self, id: LoadRequestId, cancel: &CancellationToken) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if !self.is_current(id) {
            return Err(Error::Superseded);
        }
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        Ok(())
    }

    /// Cancellation error for a load that was interrupted
    fn interrupted(&self, id: LoadRequestId, cancel: &CancellationToken) -> Error {
        self.checkpoint(id, cancel).err().unwrap_or(Error::Aborted)
    }

    /// Bump the generation, cancel whatever load is in flight and wait for
    /// it to unwind
    async fn interrupt_in_flight(&self) {
        self.request_id.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.state.lock().in_flight.take();
        if let Some(in_flight) = in_flight {
            in_flight.interrupt().await;
        }
    }

    async fn teardown_active(&self) {
        let (handle, drm) = {
            let mut state = self.state.lock();
            state.strategy_id = None;
            state.source = None;
            (state.handle.take(), state.drm.take())
        };
        if let Some(handle) = handle {
            debug!(strategy = handle.id(), "Destroying active strategy");
            handle.destroy().await;
        }
        if let Some(drm) = drm {
            drm.destroy().await;
        }
    }

    async fn ensure_initialized(&self) -> Result<CapabilitySnapshot> {
        let snapshot = self
            .ready
            .get_or_try_init(|| async {
                let snapshot = match self.capabilities.get().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "Capability resolution failed");
                        self.report_fatal(&e);
                        return Err(e);
                    }
                };
                self.ensure_usable()?;
                self.start_telemetry();
                self.plugins.init(&snapshot);
                self.emit(EngineEvent::Ready {
                    capabilities: snapshot,
                });
                info!(os = %snapshot.os, native_hls = snapshot.native_hls, mse = snapshot.mse, "Engine ready");
                Ok(snapshot)
            })
            .await?;
        Ok(*snapshot)
    }

    fn start_telemetry(&self) {
        let events = self.events.clone();
        let plugins = self.plugins.clone();
        let sink: TelemetrySink = Arc::new(move |event| fan_out(&events, &plugins, event));
        let pump = TelemetryPump::spawn(self.element.clone(), self.config.frame_interval(), sink);
        *self.telemetry.lock() = Some(pump);
    }

    /// Quality switches from a strategy created by load `id`; dropped once
    /// that load is superseded.
    fn quality_callback(&self, id: LoadRequestId) -> QualityCallback {
        let events = self.events.clone();
        let plugins = self.plugins.clone();
        let generation = self.request_id.clone();
        Arc::new(move |level| {
            if generation.load(Ordering::SeqCst) != id {
                return;
            }
            fan_out(&events, &plugins, EngineEvent::QualityChange { level });
        })
    }

    fn report_fatal(&self, error: &Error) {
        self.plugins.error(error);
        self.emit(EngineEvent::Error {
            code: error.error_code().to_string(),
            message: error.to_string(),
            fatal: true,
        });
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Deliver a playback event to plugins, then to event subscribers
fn fan_out(events: &broadcast::Sender<EngineEvent>, plugins: &PluginBus, event: EngineEvent) {
    match &event {
        EngineEvent::Play => plugins.play(),
        EngineEvent::Pause => plugins.pause(),
        EngineEvent::TimeUpdate {
            current_time,
            duration,
        } => plugins.time_update(*current_time, *duration),
        EngineEvent::VolumeChange { volume, muted } => plugins.volume_change(*volume, *muted),
        EngineEvent::QualityChange { level } => plugins.quality_change(level),
        _ => {}
    }
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StaticProbe;
    use crate::media::{HeadlessElement, MediaEvent};
    use crate::retry::{RetryOn, RetryPolicy};

    fn engine(element: Arc<HeadlessElement>) -> LoadOrchestrator {
        let config = EngineConfig {
            load_timeout_ms: 1_000,
            ..Default::default()
        };
        LoadOrchestrator::new(
            element,
            Arc::new(StaticProbe(CapabilitySnapshot::desktop())),
            config,
        )
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay_ms: 0,
            retry_on: vec![RetryOn::All],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_emits_ready_once() {
        let element = Arc::new(HeadlessElement::new());
        let engine = engine(element);
        let mut events = engine.subscribe().unwrap();

        let (a, b) = tokio::join!(engine.initialize(), engine.initialize());
        a.unwrap();
        b.unwrap();
        engine.initialize().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), EngineEvent::Ready { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_source_loads() {
        let element = Arc::new(HeadlessElement::new());
        let engine = engine(element.clone());

        let driver = element.clone();
        tokio::spawn(async move {
            while driver.src().is_none() {
                tokio::task::yield_now().await;
            }
            driver.emit(MediaEvent::LoadedData);
        });

        engine
            .load_source(LoadRequest::new("https://cdn.example.com/movie.mp4"))
            .await
            .unwrap();
        assert_eq!(engine.current_strategy_id().unwrap().as_deref(), Some("direct"));
        assert_eq!(
            engine.current_source().unwrap().as_deref(),
            Some("https://cdn.example.com/movie.mp4")
        );
        assert_eq!(element.src().as_deref(), Some("https://cdn.example.com/movie.mp4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_extension_fails_without_retry() {
        let element = Arc::new(HeadlessElement::new());
        let engine = engine(element.clone());

        let err = engine
            .load_source(LoadRequest::new("video.xyz").with_retry(fast_policy(3)))
            .await
            .unwrap_err();
        match err {
            Error::AllCandidatesFailed { attempts, last_error } => {
                assert_eq!(attempts, 1);
                assert!(last_error.contains("video.xyz"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(element.load_calls(), 0);
    }

    #[tokio::test]
    async fn test_drm_without_protection_is_fatal() {
        let element = Arc::new(HeadlessElement::new());
        let engine = engine(element.clone());

        let request = LoadRequest::new("movie.mp4").with_drm(DrmConfig::new(vec![
            crate::drm::KeySystemConfig::new("com.widevine.alpha"),
        ]));
        let err = engine.load_source(request).await.unwrap_err();
        assert!(err.is_drm_fatal());
        assert_eq!(element.load_calls(), 0);
    }

    #[tokio::test]
    async fn test_methods_fail_after_dispose() {
        let element = Arc::new(HeadlessElement::new());
        let engine = engine(element);
        engine.initialize().await.unwrap();
        engine.dispose().await.unwrap();

        assert!(engine.is_disposed());
        assert!(matches!(engine.initialize().await, Err(Error::Disposed)));
        assert!(matches!(
            engine.load_source(LoadRequest::new("a.mp4")).await,
            Err(Error::Disposed)
        ));
        assert!(matches!(engine.quality_levels(), Err(Error::Disposed)));
        assert!(matches!(engine.set_quality("auto"), Err(Error::Disposed)));
        assert!(matches!(engine.cleanup().await, Err(Error::Disposed)));
        assert!(matches!(engine.dispose().await, Err(Error::Disposed)));
        assert!(matches!(engine.subscribe(), Err(Error::Disposed)));
        assert!(matches!(engine.current_source(), Err(Error::Disposed)));
    }

    #[tokio::test]
    async fn test_cleanup_bumps_request_id() {
        let element = Arc::new(HeadlessElement::new());
        let engine = engine(element);
        let before = engine.request_id();
        engine.cleanup().await.unwrap();
        assert_eq!(engine.request_id(), before + 1);
        assert!(!engine.is_disposed());
        assert!(engine.quality_levels().unwrap().is_empty());
    }
}
