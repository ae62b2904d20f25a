//! The LTP session state machine.
//!
//! Phases: Disconnected → Connecting → AwaitingAck → Active, with
//! Reconnecting between unintended disconnects and Closed as the terminal
//! phase. Three background tasks serve an active session:
//!
//! - *receiver* — drains the transport, validates frames, dispatches to the
//!   observer; ends when the transport closes.
//! - *heartbeat* — periodic ping with a bounded pong wait.
//! - *reconnect* — at most one at a time; owns the backoff sleep and drives
//!   `connect_once` until it succeeds or retries are exhausted.
//!
//! All shared state is mutated under short-lived locks; nothing holds a lock
//! across transport I/O.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ltp_crypto::ecdh::EcdhKeyPair;
use ltp_crypto::{kdf, mac};
use ltp_proto::{
    subprotocol, ErrorPayload, HandshakeAck, HandshakeInit, HandshakeReject, HandshakeResume,
    KeyAgreement, MessageType, Meta,
};
use ltp_store::IdentityStore;

use crate::config::{ClientConfig, CLOCK_SKEW_TOLERANCE_MS};
use crate::error::{LtpError, Result};
use crate::observer::{NoopObserver, SessionObserver};
use crate::pipeline::Pipeline;
use crate::security::SessionSecurity;
use crate::transport::{Transport, TransportSink, TransportStream, WsTransport};

/// Server key attestations older than this are refused.
const ECDH_SIGNATURE_MAX_AGE_MS: i64 = 300_000;

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    AwaitingAck,
    Active,
    Reconnecting,
    Closed,
}

/// Per-message overrides for context tag and affect metadata.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub context_tag: Option<String>,
    pub affect: Option<BTreeMap<String, f64>>,
}

struct SessionState {
    phase: SessionPhase,
    thread_id: Option<String>,
    session_id: Option<String>,
    heartbeat_interval_ms: u64,
    reconnect_attempts: u32,
}

#[derive(Default)]
struct Tasks {
    receiver: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

/// Client for establishing and managing liminal thread sessions.
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct LtpClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    client_id: String,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SessionObserver>,
    pipeline: Pipeline,
    store: Mutex<IdentityStore>,
    security: Mutex<SessionSecurity>,
    state: Mutex<SessionState>,
    sink: AsyncMutex<Option<Box<dyn TransportSink>>>,
    pong_notify: Notify,
    tasks: Mutex<Tasks>,
    closed: AtomicBool,
}

impl LtpClient {
    /// Client over the default WebSocket transport, without callbacks.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport_and_observer(config, Arc::new(WsTransport), Arc::new(NoopObserver))
    }

    pub fn with_observer(config: ClientConfig, observer: Arc<dyn SessionObserver>) -> Self {
        Self::with_transport_and_observer(config, Arc::new(WsTransport), observer)
    }

    /// Full control over the transport seam; tests and alternate stacks.
    pub fn with_transport_and_observer(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("client-{}", uuid::Uuid::new_v4()));
        let store = match &config.storage_path {
            Some(path) => IdentityStore::new(path.clone()),
            None => IdentityStore::open_default(),
        };
        let pipeline = Pipeline::new(client_id.clone(), config.enable_metadata_encryption);
        let max_age = config.max_message_age_ms;

        Self {
            inner: Arc::new(Inner {
                config,
                client_id,
                transport,
                observer,
                pipeline,
                store: Mutex::new(store),
                security: Mutex::new(SessionSecurity::new(max_age)),
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Disconnected,
                    thread_id: None,
                    session_id: None,
                    heartbeat_interval_ms: 15_000,
                    reconnect_attempts: 0,
                }),
                sink: AsyncMutex::new(None),
                pong_notify: Notify::new(),
                tasks: Mutex::new(Tasks::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect and complete the handshake. Resumes the stored thread when
    /// one exists for this client id.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(LtpError::Closed);
        }
        if self.inner.state.lock().phase == SessionPhase::Active {
            debug!("connect() called while already active");
            return Ok(());
        }
        match Inner::connect_once(self.inner.clone(), "manual_reconnect").await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut state = self.inner.state.lock();
                match &err {
                    LtpError::EcdhAuthFailed(_) | LtpError::HandshakeRejected(_) => {
                        state.phase = SessionPhase::Closed;
                    }
                    _ => state.phase = SessionPhase::Disconnected,
                }
                Err(err)
            }
        }
    }

    /// Tear the session down. Idempotent; no reconnect will follow.
    pub async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        {
            let mut tasks = self.inner.tasks.lock();
            for handle in [
                tasks.receiver.take(),
                tasks.heartbeat.take(),
                tasks.reconnect.take(),
            ]
            .into_iter()
            .flatten()
            {
                handle.abort();
            }
        }

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            sink.close().await;
        }

        let was_active = {
            let mut state = self.inner.state.lock();
            let was_active = state.phase == SessionPhase::Active;
            state.phase = SessionPhase::Closed;
            was_active
        };
        self.inner.security.lock().clear();

        if was_active {
            self.inner.observer.disconnected();
        }
    }

    pub async fn send_state_update(&self, kind: &str, data: Value) -> Result<()> {
        self.send_state_update_with(kind, data, SendOptions::default())
            .await
    }

    pub async fn send_state_update_with(
        &self,
        kind: &str,
        data: Value,
        options: SendOptions,
    ) -> Result<()> {
        Inner::send_envelope(
            &self.inner,
            MessageType::StateUpdate,
            json!({"kind": kind, "data": data}),
            options,
        )
        .await
    }

    pub async fn send_event(&self, event_type: &str, data: Value) -> Result<()> {
        self.send_event_with(event_type, data, SendOptions::default())
            .await
    }

    pub async fn send_event_with(
        &self,
        event_type: &str,
        data: Value,
        options: SendOptions,
    ) -> Result<()> {
        Inner::send_envelope(
            &self.inner,
            MessageType::Event,
            json!({"event_type": event_type, "data": data}),
            options,
        )
        .await
    }

    /// Usually driven by the heartbeat task.
    pub async fn send_ping(&self) -> Result<()> {
        Inner::send_envelope(&self.inner, MessageType::Ping, json!({}), SendOptions::default())
            .await
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn thread_id(&self) -> Option<String> {
        self.inner.state.lock().thread_id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }
}

impl Inner {
    // ── Handshake ────────────────────────────────────────────────────────────

    fn connect_once<'a>(
        inner: Arc<Inner>,
        resume_reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            inner.state.lock().phase = SessionPhase::Connecting;

            let protocol = subprotocol();
            let pair = inner
                .transport
                .open(&inner.config.url, &[protocol.as_str()])
                .await?;
            let mut sink = pair.sink;
            let mut stream = pair.stream;

            let ecdh = if inner.config.enable_ecdh_key_exchange {
                if inner.config.ecdh_signing_key().is_none() {
                    warn!(
                        "ECDH key exchange enabled without a long-term secret; \
                         the exchange is open to active interception"
                    );
                }
                Some(EcdhKeyPair::generate())
            } else {
                None
            };

            let stored = inner.store.lock().get_ids(&inner.client_id);
            let opening = match &stored {
                Some(ids) => {
                    debug!(thread_id = %ids.thread_id, "resuming stored thread");
                    inner.handshake_resume(&ids.thread_id, resume_reason, ecdh.as_ref())?
                }
                None => inner.handshake_init(ecdh.as_ref())?,
            };
            sink.send(opening).await?;

            inner.state.lock().phase = SessionPhase::AwaitingAck;

            let ack = {
                let wait =
                    inner.wait_for_ack(&mut sink, &mut stream, stored.is_some(), ecdh.as_ref());
                match inner.config.handshake_timeout_ms {
                    Some(ms) => tokio::time::timeout(Duration::from_millis(ms), wait)
                        .await
                        .map_err(|_| LtpError::Handshake("handshake timed out".to_string()))??,
                    None => wait.await?,
                }
            };

            Inner::complete_handshake(inner, ack, ecdh, sink, stream).await
        })
    }

    async fn wait_for_ack(
        &self,
        sink: &mut Box<dyn TransportSink>,
        stream: &mut Box<dyn TransportStream>,
        mut resuming: bool,
        ecdh: Option<&EcdhKeyPair>,
    ) -> Result<HandshakeAck> {
        loop {
            let Some(text) = stream.recv().await else {
                return Err(LtpError::Handshake(
                    "transport closed during handshake".to_string(),
                ));
            };
            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(err) => {
                    debug!(error = %err, "dropping unparseable frame during handshake");
                    continue;
                }
            };
            self.observer.message(&value);

            match value.get("type").and_then(Value::as_str) {
                Some("handshake_ack") => return Ok(HandshakeAck::from_value(value)?),
                Some("handshake_reject") => {
                    let reason = HandshakeReject::from_value(value)
                        .map(|r| r.reason)
                        .unwrap_or_else(|_| "unspecified".to_string());
                    if resuming {
                        // The server would not re-bind the thread: forget it
                        // and start fresh over the same connection.
                        warn!(reason = %reason, "resume rejected, re-initiating with a fresh thread");
                        if let Err(err) = self.store.lock().clear(&self.client_id) {
                            warn!(error = %err, "failed to clear stored thread identity");
                        }
                        resuming = false;
                        let init = self.handshake_init(ecdh)?;
                        sink.send(init).await?;
                    } else {
                        return Err(LtpError::HandshakeRejected(reason));
                    }
                }
                other => {
                    debug!(message_type = ?other, "ignoring frame while awaiting handshake ack");
                }
            }
        }
    }

    async fn complete_handshake(
        inner: Arc<Inner>,
        ack: HandshakeAck,
        ecdh: Option<EcdhKeyPair>,
        mut sink: Box<dyn TransportSink>,
        stream: Box<dyn TransportStream>,
    ) -> Result<()> {
        if ack.thread_id.is_empty() || ack.session_id.is_empty() {
            return Err(LtpError::Handshake(
                "handshake_ack missing thread or session id".to_string(),
            ));
        }

        if let Err(err) =
            inner
                .store
                .lock()
                .set_ids(&inner.client_id, &ack.thread_id, &ack.session_id)
        {
            warn!(error = %err, "failed to persist thread identity");
        }

        let mut security = SessionSecurity::new(inner.config.max_message_age_ms);
        if let Some(mac_key) = inner.config.configured_mac_key() {
            security.set_mac_key(mac_key);
        }
        security.require_signature_verification = inner.config.require_signature_verification();

        if let Some(keypair) = ecdh {
            match ack.server_ecdh_public_key.as_deref() {
                Some(server_public) => {
                    if let (Some(secret), Some(signature), Some(timestamp)) = (
                        inner.config.ecdh_signing_key(),
                        ack.server_ecdh_signature.as_deref(),
                        ack.server_ecdh_timestamp,
                    ) {
                        if let Err(reason) = verify_ecdh_key(
                            server_public,
                            &ack.session_id,
                            timestamp,
                            signature,
                            secret,
                            now_ms(),
                        ) {
                            error!(reason = %reason, "server ECDH key attestation failed");
                            inner.observer.error(ErrorPayload {
                                error_code: "ECDH_AUTH_FAILED".to_string(),
                                error_message: reason.clone(),
                                details: None,
                            });
                            sink.close().await;
                            inner.closed.store(true, Ordering::SeqCst);
                            inner.state.lock().phase = SessionPhase::Closed;
                            return Err(LtpError::EcdhAuthFailed(reason));
                        }
                    }

                    // The ephemeral private key dies here.
                    let shared = keypair.agree(server_public)?;
                    let keys = kdf::derive_session_keys(&shared, &ack.session_id)?;
                    security.install_session_keys(&keys.encryption_key, &keys.mac_key);
                }
                None => {
                    warn!("ECDH enabled but the server returned no public key; continuing unkeyed");
                }
            }
        }

        *inner.security.lock() = security;

        {
            let mut state = inner.state.lock();
            state.phase = SessionPhase::Active;
            state.thread_id = Some(ack.thread_id.clone());
            state.session_id = Some(ack.session_id.clone());
            if ack.heartbeat_interval_ms > 0 {
                state.heartbeat_interval_ms = ack.heartbeat_interval_ms;
            } else {
                state.heartbeat_interval_ms = inner.config.heartbeat.interval_ms;
            }
            state.reconnect_attempts = 0;
        }

        *inner.sink.lock().await = Some(sink);

        let receiver = tokio::spawn(Inner::receiver_loop(inner.clone(), stream));
        let heartbeat = inner
            .config
            .heartbeat
            .enabled
            .then(|| tokio::spawn(Inner::heartbeat_loop(inner.clone())));
        {
            let mut tasks = inner.tasks.lock();
            if let Some(old) = tasks.receiver.replace(receiver) {
                old.abort();
            }
            if let Some(old) = std::mem::replace(&mut tasks.heartbeat, heartbeat) {
                old.abort();
            }
        }

        info!(thread_id = %ack.thread_id, session_id = %ack.session_id, "session active");
        inner.observer.connected(&ack.thread_id, &ack.session_id);
        Ok(())
    }

    fn handshake_init(&self, ecdh: Option<&EcdhKeyPair>) -> Result<String> {
        let mut init = HandshakeInit::new(&self.client_id);
        init.device_fingerprint = self.config.device_fingerprint.clone();
        init.intent = Some(self.config.intent.clone());
        init.capabilities = self.config.capabilities.clone();
        init.metadata = self.handshake_metadata();

        if let Some(keypair) = ecdh {
            init.client_ecdh_public_key = Some(keypair.public_hex().to_string());
            init.key_agreement = Some(KeyAgreement::default());
            if let Some(secret) = self.config.ecdh_signing_key() {
                let timestamp = now_ms();
                init.client_ecdh_signature = Some(sign_ecdh_key(
                    keypair.public_hex(),
                    &self.client_id,
                    timestamp,
                    secret,
                ));
                init.client_ecdh_timestamp = Some(timestamp);
            }
        }

        serde_json::to_string(&init).map_err(|e| LtpError::Proto(ltp_proto::ProtoError::Parse(e)))
    }

    fn handshake_resume(
        &self,
        thread_id: &str,
        resume_reason: &str,
        ecdh: Option<&EcdhKeyPair>,
    ) -> Result<String> {
        let mut resume = HandshakeResume::new(&self.client_id, thread_id, resume_reason);

        if let Some(keypair) = ecdh {
            resume.client_ecdh_public_key = Some(keypair.public_hex().to_string());
            resume.key_agreement = Some(KeyAgreement::default());
            if let Some(secret) = self.config.ecdh_signing_key() {
                let timestamp = now_ms();
                resume.client_ecdh_signature = Some(sign_ecdh_key(
                    keypair.public_hex(),
                    &self.client_id,
                    timestamp,
                    secret,
                ));
                resume.client_ecdh_timestamp = Some(timestamp);
            }
        }

        serde_json::to_string(&resume).map_err(|e| LtpError::Proto(ltp_proto::ProtoError::Parse(e)))
    }

    /// Handshake metadata: sdk_version and platform stamped under whatever
    /// the application configured.
    fn handshake_metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("sdk_version".to_string(), json!(SDK_VERSION));
        metadata.insert(
            "platform".to_string(),
            json!(format!("rust-{}", std::env::consts::OS)),
        );
        for (key, value) in &self.config.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        metadata
    }

    // ── Steady-state tasks ───────────────────────────────────────────────────

    async fn receiver_loop(inner: Arc<Inner>, mut stream: Box<dyn TransportStream>) {
        while let Some(text) = stream.recv().await {
            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(err) => {
                    debug!(error = %err, "dropping unparseable inbound frame");
                    continue;
                }
            };
            inner.observer.message(&value);

            let envelope = {
                let mut security = inner.security.lock();
                match inner
                    .pipeline
                    .validate_inbound(value, &mut security, now_ms())
                {
                    Ok(envelope) => envelope,
                    Err(reason) => {
                        debug!(reason = %reason, "dropping inbound frame");
                        continue;
                    }
                }
            };

            match envelope.message_type {
                MessageType::Pong => {
                    inner.pong_notify.notify_one();
                    inner.observer.pong();
                }
                MessageType::StateUpdate => inner.observer.state_update(envelope.payload),
                MessageType::Event => inner.observer.event(envelope.payload),
                MessageType::Error => {
                    let payload = serde_json::from_value::<ErrorPayload>(envelope.payload.clone())
                        .unwrap_or_else(|_| ErrorPayload {
                            error_code: "unknown".to_string(),
                            error_message: envelope.payload.to_string(),
                            details: None,
                        });
                    warn!(code = %payload.error_code, message = %payload.error_message, "server reported an error");
                    inner.observer.error(payload);
                }
                MessageType::Ping => debug!("unsolicited server ping"),
                MessageType::HandshakeInit
                | MessageType::HandshakeResume
                | MessageType::HandshakeAck
                | MessageType::HandshakeReject => {
                    // Out-of-phase handshake traffic is a protocol violation,
                    // not routine noise. The session itself stays up.
                    warn!(
                        message_type = envelope.message_type.as_str(),
                        "handshake frame received while the session is active"
                    );
                    inner.observer.error(ErrorPayload {
                        error_code: "UNEXPECTED_HANDSHAKE_FRAME".to_string(),
                        error_message: format!(
                            "{} received while the session is active",
                            envelope.message_type.as_str()
                        ),
                        details: None,
                    });
                }
            }
        }

        Inner::handle_disconnect(&inner, "transport_closed", false, true).await;
    }

    async fn heartbeat_loop(inner: Arc<Inner>) {
        loop {
            let interval = inner.state.lock().heartbeat_interval_ms;
            tokio::time::sleep(Duration::from_millis(interval)).await;

            if inner.state.lock().phase != SessionPhase::Active {
                return;
            }
            if let Err(err) =
                Inner::send_envelope(&inner, MessageType::Ping, json!({}), SendOptions::default())
                    .await
            {
                debug!(error = %err, "heartbeat ping failed");
            }

            let timeout = Duration::from_millis(inner.config.heartbeat.timeout_ms);
            if tokio::time::timeout(timeout, inner.pong_notify.notified())
                .await
                .is_err()
            {
                warn!("heartbeat timed out waiting for pong");
                Inner::handle_disconnect(&inner, "heartbeat_timeout", true, false).await;
                return;
            }
        }
    }

    async fn reconnect_loop(inner: Arc<Inner>) {
        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            let attempt = inner.state.lock().reconnect_attempts;
            if attempt >= inner.config.reconnect.max_retries {
                error!(
                    retries = inner.config.reconnect.max_retries,
                    "reconnect attempts exhausted, session closed"
                );
                inner.state.lock().phase = SessionPhase::Closed;
                return;
            }

            let delay = inner.config.reconnect.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");
            tokio::time::sleep(delay).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }

            inner.state.lock().reconnect_attempts = attempt + 1;
            match Inner::connect_once(inner.clone(), "automatic_reconnect").await {
                Ok(()) => return,
                Err(LtpError::EcdhAuthFailed(reason)) => {
                    error!(reason = %reason, "reconnect aborted, server failed key authentication");
                    return;
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "reconnect attempt failed");
                    inner.state.lock().phase = SessionPhase::Reconnecting;
                }
            }
        }
    }

    /// Transition out of Active exactly once per session; later calls no-op.
    async fn handle_disconnect(
        inner: &Arc<Inner>,
        reason: &str,
        abort_receiver: bool,
        abort_heartbeat: bool,
    ) {
        let manual = inner.closed.load(Ordering::SeqCst);
        {
            let mut state = inner.state.lock();
            if state.phase != SessionPhase::Active {
                return;
            }
            state.phase = if manual {
                SessionPhase::Closed
            } else {
                SessionPhase::Reconnecting
            };
        }
        warn!(reason, "session disconnected");

        inner.security.lock().clear();
        {
            let mut tasks = inner.tasks.lock();
            if abort_receiver {
                if let Some(handle) = tasks.receiver.take() {
                    handle.abort();
                }
            }
            if abort_heartbeat {
                if let Some(handle) = tasks.heartbeat.take() {
                    handle.abort();
                }
            }
        }
        if let Some(mut sink) = inner.sink.lock().await.take() {
            sink.close().await;
        }

        inner.observer.disconnected();

        if !manual {
            let mut tasks = inner.tasks.lock();
            let idle = tasks
                .reconnect
                .as_ref()
                .map_or(true, |handle| handle.is_finished());
            if idle {
                tasks.reconnect = Some(tokio::spawn(Inner::reconnect_loop(inner.clone())));
            }
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    async fn send_envelope(
        inner: &Arc<Inner>,
        message_type: MessageType,
        payload: Value,
        options: SendOptions,
    ) -> Result<()> {
        let (thread_id, session_id) = {
            let state = inner.state.lock();
            if state.phase != SessionPhase::Active {
                debug!(
                    message_type = message_type.as_str(),
                    "not connected, dropping outbound envelope"
                );
                return Ok(());
            }
            (
                state.thread_id.clone().unwrap_or_default(),
                state.session_id.clone().unwrap_or_default(),
            )
        };

        let meta = Meta {
            client_id: Some(inner.client_id.clone()),
            context_tag: options
                .context_tag
                .or_else(|| inner.config.default_context_tag.clone()),
            affect: options
                .affect
                .or_else(|| inner.config.default_affect.clone()),
            ..Meta::default()
        };

        let wire = {
            let mut security = inner.security.lock();
            match inner.pipeline.build_outbound(
                message_type,
                payload,
                meta,
                &thread_id,
                &session_id,
                now_ms(),
                &mut security,
            ) {
                Ok(wire) => wire,
                Err(LtpError::Proto(err)) => {
                    warn!(error = %err, "canonicalization failed, dropping outbound envelope");
                    return Ok(());
                }
                Err(other) => return Err(other),
            }
        };
        let text = match serde_json::to_string(&wire) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "serialization failed, dropping outbound envelope");
                return Ok(());
            }
        };

        let mut guard = inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            debug!("transport not open, dropping outbound envelope");
            return Ok(());
        };
        sink.send(text).await.map_err(LtpError::from)
    }
}

/// HMAC attestation over an ephemeral ECDH public key:
/// `HMAC-SHA256(secret, public ":" entity ":" timestamp)`.
fn sign_ecdh_key(public_key: &str, entity_id: &str, timestamp: i64, secret: &str) -> String {
    mac::hmac_sha256_hex(
        secret.as_bytes(),
        format!("{public_key}:{entity_id}:{timestamp}").as_bytes(),
    )
}

fn verify_ecdh_key(
    public_key: &str,
    entity_id: &str,
    timestamp: i64,
    signature: &str,
    secret: &str,
    now_ms: i64,
) -> std::result::Result<(), String> {
    let age = now_ms - timestamp;
    if age > ECDH_SIGNATURE_MAX_AGE_MS {
        return Err(format!("key attestation expired ({age} ms old)"));
    }
    if age < -CLOCK_SKEW_TOLERANCE_MS {
        return Err(format!("key attestation from the future ({} ms ahead)", -age));
    }
    let expected = sign_ecdh_key(public_key, entity_id, timestamp, secret);
    if !mac::constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
        return Err("key attestation signature mismatch".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_attestation_roundtrip() {
        let now = 1_700_000_000_000;
        let sig = sign_ecdh_key("04abcd", "session-1", now, "secret");
        assert!(verify_ecdh_key("04abcd", "session-1", now, &sig, "secret", now + 10).is_ok());
    }

    #[test]
    fn ecdh_attestation_rejects_mutation() {
        let now = 1_700_000_000_000;
        let sig = sign_ecdh_key("04abcd", "session-1", now, "secret");

        let mut corrupted = sig.clone().into_bytes();
        corrupted[0] = if corrupted[0] == b'0' { b'1' } else { b'0' };
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(verify_ecdh_key("04abcd", "session-1", now, &corrupted, "secret", now).is_err());

        // Signed for a different entity.
        assert!(verify_ecdh_key("04abcd", "session-2", now, &sig, "secret", now).is_err());
    }

    #[test]
    fn ecdh_attestation_freshness_window() {
        let now = 1_700_000_000_000;
        let signed_at = now - ECDH_SIGNATURE_MAX_AGE_MS - 1;
        let sig = sign_ecdh_key("04abcd", "s", signed_at, "secret");
        assert!(verify_ecdh_key("04abcd", "s", signed_at, &sig, "secret", now).is_err());

        let future = now + CLOCK_SKEW_TOLERANCE_MS + 1;
        let sig = sign_ecdh_key("04abcd", "s", future, "secret");
        assert!(verify_ecdh_key("04abcd", "s", future, &sig, "secret", now).is_err());

        let in_window = now - ECDH_SIGNATURE_MAX_AGE_MS + 1;
        let sig = sign_ecdh_key("04abcd", "s", in_window, "secret");
        assert!(verify_ecdh_key("04abcd", "s", in_window, &sig, "secret", now).is_ok());
    }
}

