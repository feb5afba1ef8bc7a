//! DRM - key system negotiation and license exchange
//!
//! Supports any key system the host's content protection module accepts,
//! with presets for:
//! - Widevine (Chrome, Android, Chromecast)
//! - FairPlay (Safari, iOS, tvOS)
//! - PlayReady (Edge, Windows)
//! - ClearKey (open standard, license built locally)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   DrmNegotiator                      │
//! ├─────────────────────────────────────────────────────┤
//! │  key systems (in order) ──► ContentProtection        │
//! │                               │ first accepted       │
//! │                               ▼                      │
//! │                  MediaKeys ──► MediaElement          │
//! │                               │ encrypted event      │
//! │                               ▼                      │
//! │   KeySession ◄── license ◄── LicenseHandler | POST   │
//! └─────────────────────────────────────────────────────┘
//! ```

use crate::error::{Error, Result};
use crate::media::{EncryptedInit, MediaElement, MediaEvent};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Default license exchange timeout
pub const DEFAULT_LICENSE_TIMEOUT: Duration = Duration::from_secs(15);

/// DRM system types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrmSystem {
    Widevine,
    FairPlay,
    PlayReady,
    ClearKey,
}

impl DrmSystem {
    /// Returns the system ID (UUID) used in PSSH boxes
    pub fn system_id(&self) -> &'static str {
        match self {
            DrmSystem::Widevine => "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed",
            DrmSystem::FairPlay => "94ce86fb-07ff-4f43-adb8-93d2fa968ca2",
            DrmSystem::PlayReady => "9a04f079-9840-4286-ab92-e65be0885f95",
            DrmSystem::ClearKey => "1077efec-c0b2-4d02-ace3-3c1e52e2fb4b",
        }
    }

    /// Returns the EME key system string
    pub fn key_system(&self) -> &'static str {
        match self {
            DrmSystem::Widevine => "com.widevine.alpha",
            DrmSystem::FairPlay => "com.apple.fps.1_0",
            DrmSystem::PlayReady => "com.microsoft.playready",
            DrmSystem::ClearKey => "org.w3.clearkey",
        }
    }

    /// Map an EME key system string back to a known system
    pub fn from_key_system(key_system: &str) -> Option<Self> {
        match key_system {
            "com.widevine.alpha" => Some(DrmSystem::Widevine),
            ks if ks.starts_with("com.apple.fps") => Some(DrmSystem::FairPlay),
            ks if ks.starts_with("com.microsoft.playready") => Some(DrmSystem::PlayReady),
            "org.w3.clearkey" => Some(DrmSystem::ClearKey),
            _ => None,
        }
    }
}

/// A content type the key system must be able to decrypt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCapability {
    pub content_type: String,
    pub robustness: Option<String>,
}

impl MediaCapability {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            robustness: None,
        }
    }
}

/// License request handed to a custom handler
#[derive(Debug, Clone)]
pub struct LicenseRequest {
    pub key_system: String,
    pub session_id: String,
    /// Key message produced by the CDM
    pub message: Bytes,
    pub license_url: Option<Url>,
    pub headers: HashMap<String, String>,
}

/// Caller-supplied license delivery
#[async_trait]
pub trait LicenseHandler: Send + Sync {
    async fn request_license(&self, request: LicenseRequest) -> Result<Bytes>;
}

/// One candidate key system
#[derive(Clone)]
pub struct KeySystemConfig {
    /// EME key system string, e.g. "com.widevine.alpha"
    pub key_system: String,
    /// License server URL for the default POST exchange
    pub license_url: Option<Url>,
    /// Headers for license requests
    pub headers: HashMap<String, String>,
    pub video_capabilities: Vec<MediaCapability>,
    pub audio_capabilities: Vec<MediaCapability>,
    /// Replaces the POST exchange when present
    pub license_handler: Option<Arc<dyn LicenseHandler>>,
}

impl std::fmt::Debug for KeySystemConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySystemConfig")
            .field("key_system", &self.key_system)
            .field("license_url", &self.license_url.as_ref().map(Url::as_str))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("video_capabilities", &self.video_capabilities)
            .field("audio_capabilities", &self.audio_capabilities)
            .field("license_handler", &self.license_handler.is_some())
            .finish()
    }
}

impl KeySystemConfig {
    pub fn new(key_system: impl Into<String>) -> Self {
        Self {
            key_system: key_system.into(),
            license_url: None,
            headers: HashMap::new(),
            video_capabilities: vec![MediaCapability::new(r#"video/mp4; codecs="avc1.42E01E""#)],
            audio_capabilities: vec![MediaCapability::new(r#"audio/mp4; codecs="mp4a.40.2""#)],
            license_handler: None,
        }
    }

    /// Create a Widevine configuration
    pub fn widevine(license_url: Url) -> Self {
        Self {
            license_url: Some(license_url),
            ..Self::new(DrmSystem::Widevine.key_system())
        }
    }

    /// Create a PlayReady configuration
    pub fn playready(license_url: Url) -> Self {
        Self {
            license_url: Some(license_url),
            ..Self::new(DrmSystem::PlayReady.key_system())
        }
    }

    /// Create a FairPlay configuration; certificate handling belongs in a
    /// custom license handler.
    pub fn fairplay(license_url: Url) -> Self {
        Self {
            license_url: Some(license_url),
            ..Self::new(DrmSystem::FairPlay.key_system())
        }
    }

    /// Create a ClearKey configuration from base64url key id -> key pairs
    pub fn clearkey(keys: HashMap<String, String>) -> Result<Self> {
        let handler = ClearKeyLicense::new(keys)?;
        Ok(Self {
            license_handler: Some(Arc::new(handler)),
            ..Self::new(DrmSystem::ClearKey.key_system())
        })
    }

    /// Add a custom header for license requests
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Use a custom license handler instead of the POST exchange
    pub fn with_license_handler(mut self, handler: Arc<dyn LicenseHandler>) -> Self {
        self.license_handler = Some(handler);
        self
    }

    /// Known system for this key system string
    pub fn system(&self) -> Option<DrmSystem> {
        DrmSystem::from_key_system(&self.key_system)
    }
}

/// Content protection requested for a load
#[derive(Debug, Clone, Default)]
pub struct DrmConfig {
    /// Candidates, tried in order
    pub key_systems: Vec<KeySystemConfig>,
    /// Overrides the engine's license timeout
    pub license_timeout: Option<Duration>,
}

impl DrmConfig {
    pub fn new(key_systems: Vec<KeySystemConfig>) -> Self {
        Self {
            key_systems,
            license_timeout: None,
        }
    }

    pub fn with_license_timeout(mut self, timeout: Duration) -> Self {
        self.license_timeout = Some(timeout);
        self
    }

    /// Check if any key system is configured
    pub fn is_configured(&self) -> bool {
        !self.key_systems.is_empty()
    }
}

/// ClearKey license built from local keys, no server round trip
pub struct ClearKeyLicense {
    keys: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ClearKeyRequest {
    kids: Vec<String>,
}

impl ClearKeyLicense {
    pub fn new(keys: HashMap<String, String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::InvalidConfig("No ClearKey keys configured".into()));
        }
        for (kid, key) in &keys {
            for value in [kid, key] {
                URL_SAFE_NO_PAD.decode(value).map_err(|e| {
                    Error::InvalidConfig(format!("ClearKey value {} is not base64url: {}", value, e))
                })?;
            }
        }
        Ok(Self { keys })
    }

    /// JSON Web Key set for the requested key ids; all keys when the message
    /// does not name any we hold.
    pub fn license_for(&self, message: &[u8]) -> Bytes {
        let requested: Vec<String> = serde_json::from_slice::<ClearKeyRequest>(message)
            .map(|r| r.kids)
            .unwrap_or_default();

        let mut selected: Vec<(&String, &String)> = self
            .keys
            .iter()
            .filter(|(kid, _)| requested.iter().any(|r| r == *kid))
            .collect();
        if selected.is_empty() {
            selected = self.keys.iter().collect();
        }
        selected.sort();

        let keys: Vec<serde_json::Value> = selected
            .into_iter()
            .map(|(kid, key)| {
                serde_json::json!({
                    "kty": "oct",
                    "kid": kid,
                    "k": key,
                })
            })
            .collect();

        let license = serde_json::json!({
            "keys": keys,
            "type": "temporary",
        });
        Bytes::from(license.to_string())
    }
}

#[async_trait]
impl LicenseHandler for ClearKeyLicense {
    async fn request_license(&self, request: LicenseRequest) -> Result<Bytes> {
        Ok(self.license_for(&request.message))
    }
}

/// Host content protection API (EME `requestMediaKeySystemAccess` +
/// `createMediaKeys`).
#[async_trait]
pub trait ContentProtection: Send + Sync {
    /// Resolve to media keys if the runtime accepts this key system
    async fn request_media_keys(&self, config: &KeySystemConfig) -> Result<Arc<dyn MediaKeys>>;
}

/// A content decryption module instance
#[async_trait]
pub trait MediaKeys: Send + Sync {
    fn key_system(&self) -> &str;

    /// Open a temporary license session
    async fn create_session(&self) -> Result<Box<dyn KeySession>>;

    /// Release the underlying protection module
    async fn release(&self) {}
}

/// One license session
#[async_trait]
pub trait KeySession: Send + Sync {
    fn session_id(&self) -> String;

    /// Produce the key message for encrypted init data
    async fn generate_request(&mut self, init: &EncryptedInit) -> Result<Bytes>;

    /// Hand the license to the CDM
    async fn update(&mut self, license: Bytes) -> Result<()>;

    async fn close(&mut self);
}

/// License delivery for one negotiated key system
#[derive(Clone)]
struct LicenseExchange {
    key_system: String,
    license_url: Option<Url>,
    headers: HashMap<String, String>,
    handler: Option<Arc<dyn LicenseHandler>>,
    client: reqwest::Client,
    timeout: Duration,
}

impl LicenseExchange {
    async fn fetch(&self, session_id: String, message: Bytes) -> Result<Bytes> {
        let request = LicenseRequest {
            key_system: self.key_system.clone(),
            session_id,
            message,
            license_url: self.license_url.clone(),
            headers: self.headers.clone(),
        };

        let exchange = async {
            match &self.handler {
                Some(handler) => handler.request_license(request).await,
                None => post_license(&self.client, request).await,
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::timeout("license request", self.timeout.as_millis() as u64))?
    }
}

/// POST the key message to the license server; the response body is the
/// opaque license.
pub async fn post_license(client: &reqwest::Client, request: LicenseRequest) -> Result<Bytes> {
    let url = request
        .license_url
        .ok_or_else(|| Error::LicenseExchange("no license server URL configured".into()))?;

    let mut builder = client.post(url.clone()).body(request.message);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await?;
    let status = response.status();
    if status.is_server_error() {
        return Err(Error::Server { status: status.as_u16() });
    }
    if !status.is_success() {
        return Err(Error::LicenseExchange(format!(
            "license server {} returned {}",
            url, status
        )));
    }

    let license = response.bytes().await?;
    debug!(url = %url, bytes = license.len(), "License received");
    Ok(license)
}

/// Perform one license exchange with an explicit timeout, outside any
/// negotiated session (used for smoke testing license servers).
pub async fn exchange_license(
    client: &reqwest::Client,
    config: &KeySystemConfig,
    message: Bytes,
    timeout: Duration,
) -> Result<Bytes> {
    let exchange = LicenseExchange {
        key_system: config.key_system.clone(),
        license_url: config.license_url.clone(),
        headers: config.headers.clone(),
        handler: config.license_handler.clone(),
        client: client.clone(),
        timeout,
    };
    exchange.fetch(uuid::Uuid::new_v4().to_string(), message).await
}

/// Negotiated content protection for one load
pub struct DrmSession {
    key_system: String,
    keys: Arc<dyn MediaKeys>,
    element: Arc<dyn MediaElement>,
    shutdown: CancellationToken,
    handler: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl DrmSession {
    /// Negotiated key system
    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Detach the encrypted handler, close license sessions and release the
    /// protection module. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            // The handler closes its sessions once it sees the shutdown.
            if let Err(e) = handler.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Encrypted event handler panicked");
                }
            }
        }
        if let Err(e) = self.element.set_media_keys(None).await {
            warn!(error = %e, "Failed to detach media keys");
        }
        self.keys.release().await;
        debug!(key_system = %self.key_system, "DRM session destroyed");
    }
}

/// Negotiates key systems and wires license exchange onto the element
pub struct DrmNegotiator {
    protection: Arc<dyn ContentProtection>,
    client: reqwest::Client,
    license_timeout: Duration,
}

impl DrmNegotiator {
    pub fn new(protection: Arc<dyn ContentProtection>, client: reqwest::Client) -> Self {
        Self {
            protection,
            client,
            license_timeout: DEFAULT_LICENSE_TIMEOUT,
        }
    }

    pub fn with_license_timeout(mut self, timeout: Duration) -> Self {
        self.license_timeout = timeout;
        self
    }

    /// Try each key system in order and attach the first accepted one.
    #[instrument(skip_all, fields(candidates = config.key_systems.len()))]
    pub async fn negotiate(
        &self,
        config: &DrmConfig,
        element: Arc<dyn MediaElement>,
        cancel: &CancellationToken,
    ) -> Result<DrmSession> {
        let mut tried = Vec::with_capacity(config.key_systems.len());
        let mut last = String::from("no key systems configured");
        let mut accepted = None;

        for candidate in &config.key_systems {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            tried.push(candidate.key_system.clone());

            let access = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Aborted),
                access = self.protection.request_media_keys(candidate) => access,
            };
            match access {
                Ok(keys) => {
                    accepted = Some((candidate, keys));
                    break;
                }
                Err(e) => {
                    debug!(key_system = %candidate.key_system, error = %e, "Key system rejected");
                    last = e.to_string();
                }
            }
        }

        let (candidate, keys) =
            accepted.ok_or(Error::KeySystemUnavailable { tried, last })?;

        // Subscribe first so init data seen right after attaching is handled.
        let events = element.subscribe();
        if let Err(e) = element.set_media_keys(Some(keys.clone())).await {
            keys.release().await;
            return Err(Error::MediaKeys(e.to_string()));
        }

        let exchange = LicenseExchange {
            key_system: candidate.key_system.clone(),
            license_url: candidate.license_url.clone(),
            headers: candidate.headers.clone(),
            handler: candidate.license_handler.clone(),
            client: self.client.clone(),
            timeout: config.license_timeout.unwrap_or(self.license_timeout),
        };
        let shutdown = CancellationToken::new();
        let handler = tokio::spawn(handle_encrypted(
            events,
            keys.clone(),
            exchange,
            shutdown.clone(),
        ));

        info!(key_system = %candidate.key_system, "Key system negotiated");

        Ok(DrmSession {
            key_system: candidate.key_system.clone(),
            keys,
            element,
            shutdown,
            handler: Mutex::new(Some(handler)),
            destroyed: AtomicBool::new(false),
        })
    }
}

/// Serve license exchanges for every encrypted event until shutdown.
///
/// Failed exchanges are logged; they never stop playback.
async fn handle_encrypted(
    mut events: broadcast::Receiver<MediaEvent>,
    keys: Arc<dyn MediaKeys>,
    exchange: LicenseExchange,
    shutdown: CancellationToken,
) {
    let mut inflight: JoinSet<Result<Box<dyn KeySession>>> = JoinSet::new();
    let mut sessions: Vec<Box<dyn KeySession>> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(done) = inflight.join_next(), if !inflight.is_empty() => match done {
                Ok(Ok(session)) => sessions.push(session),
                Ok(Err(e)) => warn!(key_system = %exchange.key_system, error = %e, "License exchange failed"),
                Err(e) => warn!(error = %e, "License task failed"),
            },
            event = events.recv() => match event {
                Ok(MediaEvent::Encrypted(init)) => {
                    debug!(init_data_type = %init.init_data_type, "Encrypted init data");
                    inflight.spawn(open_license_session(keys.clone(), init, exchange.clone()));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed media events while waiting for init data"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Aborts any exchange still in flight.
    inflight.shutdown().await;
    for mut session in sessions {
        session.close().await;
    }
}

async fn open_license_session(
    keys: Arc<dyn MediaKeys>,
    init: EncryptedInit,
    exchange: LicenseExchange,
) -> Result<Box<dyn KeySession>> {
    let mut session = keys.create_session().await?;
    let outcome = async {
        let message = session.generate_request(&init).await?;
        let license = exchange.fetch(session.session_id(), message).await?;
        session.update(license).await
    }
    .await;

    match outcome {
        Ok(()) => {
            debug!(session = %session.session_id(), "License applied");
            Ok(session)
        }
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::HeadlessElement;
    use std::sync::atomic::AtomicU32;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct FakeKeys {
        key_system: String,
        updates: Arc<Mutex<Vec<Bytes>>>,
        closed: Arc<AtomicU32>,
        released: AtomicU32,
    }

    struct FakeSession {
        updates: Arc<Mutex<Vec<Bytes>>>,
        closed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl KeySession for FakeSession {
        fn session_id(&self) -> String {
            "session-1".into()
        }

        async fn generate_request(&mut self, init: &EncryptedInit) -> Result<Bytes> {
            Ok(init.init_data.clone())
        }

        async fn update(&mut self, license: Bytes) -> Result<()> {
            self.updates.lock().push(license);
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MediaKeys for FakeKeys {
        fn key_system(&self) -> &str {
            &self.key_system
        }

        async fn create_session(&self) -> Result<Box<dyn KeySession>> {
            Ok(Box::new(FakeSession {
                updates: self.updates.clone(),
                closed: self.closed.clone(),
            }))
        }

        async fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Accepts only the listed key systems
    struct FakeProtection {
        accept: Vec<&'static str>,
        keys: Arc<FakeKeys>,
    }

    #[async_trait]
    impl ContentProtection for FakeProtection {
        async fn request_media_keys(&self, config: &KeySystemConfig) -> Result<Arc<dyn MediaKeys>> {
            if self.accept.contains(&config.key_system.as_str()) {
                Ok(self.keys.clone())
            } else {
                Err(Error::MediaKeys(format!("{} not supported", config.key_system)))
            }
        }
    }

    struct StaticLicense(&'static str);

    #[async_trait]
    impl LicenseHandler for StaticLicense {
        async fn request_license(&self, request: LicenseRequest) -> Result<Bytes> {
            assert_eq!(request.message, Bytes::from_static(b"challenge"));
            Ok(Bytes::from_static(self.0.as_bytes()))
        }
    }

    struct StalledLicense;

    #[async_trait]
    impl LicenseHandler for StalledLicense {
        async fn request_license(&self, _request: LicenseRequest) -> Result<Bytes> {
            std::future::pending().await
        }
    }

    fn protection(accept: Vec<&'static str>) -> (Arc<FakeKeys>, DrmNegotiator) {
        let keys = Arc::new(FakeKeys {
            key_system: "com.widevine.alpha".into(),
            ..Default::default()
        });
        let negotiator = DrmNegotiator::new(
            Arc::new(FakeProtection { accept, keys: keys.clone() }),
            reqwest::Client::new(),
        );
        (keys, negotiator)
    }

    fn encrypted() -> MediaEvent {
        MediaEvent::Encrypted(EncryptedInit {
            init_data_type: "cenc".into(),
            init_data: Bytes::from_static(b"challenge"),
        })
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_key_system_mapping() {
        assert_eq!(DrmSystem::Widevine.key_system(), "com.widevine.alpha");
        assert_eq!(
            DrmSystem::from_key_system("com.apple.fps.1_0"),
            Some(DrmSystem::FairPlay)
        );
        assert_eq!(DrmSystem::from_key_system("com.example.custom"), None);

        let url = Url::parse("https://license.example.com/wv").unwrap();
        let config = KeySystemConfig::widevine(url).with_header("X-Token", "abc");
        assert_eq!(config.system(), Some(DrmSystem::Widevine));
        assert_eq!(config.headers.get("X-Token").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_clearkey_license() {
        let mut keys = HashMap::new();
        keys.insert("a2lkMQ".to_string(), "a2V5MQ".to_string());
        keys.insert("a2lkMg".to_string(), "a2V5Mg".to_string());
        let handler = ClearKeyLicense::new(keys).unwrap();

        let license: serde_json::Value =
            serde_json::from_slice(&handler.license_for(br#"{"kids":["a2lkMg"]}"#)).unwrap();
        assert_eq!(license["keys"].as_array().unwrap().len(), 1);
        assert_eq!(license["keys"][0]["k"], "a2V5Mg");
        assert_eq!(license["type"], "temporary");

        let all: serde_json::Value =
            serde_json::from_slice(&handler.license_for(b"opaque")).unwrap();
        assert_eq!(all["keys"].as_array().unwrap().len(), 2);

        assert!(ClearKeyLicense::new(HashMap::new()).is_err());
        let mut bad = HashMap::new();
        bad.insert("not base64!".to_string(), "a2V5MQ".to_string());
        assert!(ClearKeyLicense::new(bad).is_err());
    }

    #[tokio::test]
    async fn test_falls_through_to_first_accepted_key_system() {
        let (keys, negotiator) = protection(vec!["com.microsoft.playready"]);
        let element = Arc::new(HeadlessElement::new());
        let config = DrmConfig::new(vec![
            KeySystemConfig::new("com.widevine.alpha"),
            KeySystemConfig::new("com.microsoft.playready"),
        ]);

        let session = negotiator
            .negotiate(&config, element.clone(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.key_system(), "com.microsoft.playready");
        assert!(element.has_media_keys());

        session.destroy().await;
        session.destroy().await;
        assert!(session.is_destroyed());
        assert!(!element.has_media_keys());
        assert_eq!(keys.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_key_system_accepted() {
        let (_, negotiator) = protection(vec![]);
        let element = Arc::new(HeadlessElement::new());
        let config = DrmConfig::new(vec![
            KeySystemConfig::new("com.widevine.alpha"),
            KeySystemConfig::new("org.w3.clearkey"),
        ]);

        let err = negotiator
            .negotiate(&config, element.clone(), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        match &err {
            Error::KeySystemUnavailable { tried, last } => {
                assert_eq!(tried.len(), 2);
                assert!(last.contains("org.w3.clearkey"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_drm_fatal());
        assert!(!element.has_media_keys());
    }

    #[tokio::test]
    async fn test_encrypted_event_runs_license_handler() {
        let (keys, negotiator) = protection(vec!["com.widevine.alpha"]);
        let element = Arc::new(HeadlessElement::new());
        let config = DrmConfig::new(vec![KeySystemConfig::new("com.widevine.alpha")
            .with_license_handler(Arc::new(StaticLicense("license-bytes")))]);

        let session = negotiator
            .negotiate(&config, element.clone(), &CancellationToken::new())
            .await
            .unwrap();
        element.emit(encrypted());
        settle().await;

        assert_eq!(*keys.updates.lock(), vec![Bytes::from_static(b"license-bytes")]);

        session.destroy().await;
        assert_eq!(keys.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_license_timeout_is_logged_not_fatal() {
        let (keys, negotiator) = protection(vec!["com.widevine.alpha"]);
        let element = Arc::new(HeadlessElement::new());
        let config = DrmConfig::new(vec![KeySystemConfig::new("com.widevine.alpha")
            .with_license_handler(Arc::new(StalledLicense))])
        .with_license_timeout(Duration::from_millis(500));

        let session = negotiator
            .negotiate(&config, element.clone(), &CancellationToken::new())
            .await
            .unwrap();
        element.emit(encrypted());
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;

        assert!(keys.updates.lock().is_empty());
        // The failed session was closed; the DRM session itself survives.
        assert_eq!(keys.closed.load(Ordering::SeqCst), 1);
        assert!(!session.is_destroyed());
        session.destroy().await;
    }

    #[tokio::test]
    async fn test_pre_cancelled_negotiation() {
        let (_, negotiator) = protection(vec!["com.widevine.alpha"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = DrmConfig::new(vec![KeySystemConfig::new("com.widevine.alpha")]);
        let err = negotiator
            .negotiate(&config, Arc::new(HeadlessElement::new()), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Aborted));
    }

    /// Serve one HTTP response and hand back the raw request
    async fn one_shot_server(status_line: &'static str, body: &'static [u8]) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
            }
            let response = format!(
                "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });
        (Url::parse(&format!("http://{}/license", addr)).unwrap(), server)
    }

    #[tokio::test]
    async fn test_post_license_exchange() {
        let (url, server) = one_shot_server("HTTP/1.1 200 OK", b"LICENSE").await;
        let config = KeySystemConfig::widevine(url).with_header("X-Custom-Token", "secret");

        let license = exchange_license(
            &reqwest::Client::new(),
            &config,
            Bytes::from_static(b"key-message"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(license, Bytes::from_static(b"LICENSE"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /license"));
        assert!(request.to_lowercase().contains("x-custom-token: secret"));
        assert!(request.ends_with("key-message"));
    }

    #[tokio::test]
    async fn test_post_license_server_error() {
        let (url, server) = one_shot_server("HTTP/1.1 503 Service Unavailable", b"").await;
        let err = exchange_license(
            &reqwest::Client::new(),
            &KeySystemConfig::widevine(url),
            Bytes::from_static(b"key-message"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Server { status: 503 }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_post_requires_url() {
        let err = exchange_license(
            &reqwest::Client::new(),
            &KeySystemConfig::new("com.widevine.alpha"),
            Bytes::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::LicenseExchange(_)));
    }
}
