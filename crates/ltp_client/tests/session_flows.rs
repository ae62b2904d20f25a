//! End-to-end session scenarios over a scripted in-memory transport.
//!
//! The test side plays the server: it accepts connections opened by the
//! client, reads the frames the client sends, and feeds responses back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use ltp_client::{
    ClientConfig, ErrorPayload, LtpClient, NoopObserver, SessionObserver, SessionPhase, Transport,
    TransportError, TransportPair, TransportSink, TransportStream,
};
use ltp_crypto::ecdh::EcdhKeyPair;
use ltp_crypto::{kdf, mac};
use ltp_proto::canonical_string;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Scripted transport ───────────────────────────────────────────────────────

/// One accepted connection, seen from the server side.
struct ServerLink {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
}

impl ServerLink {
    async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client hung up");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    fn send(&self, value: Value) {
        self.inbound
            .send(value.to_string())
            .expect("client receiver gone");
    }
}

struct ScriptedTransport {
    links: mpsc::UnboundedSender<ServerLink>,
    subprotocols_seen: Mutex<Vec<String>>,
}

fn scripted() -> (Arc<ScriptedTransport>, mpsc::UnboundedReceiver<ServerLink>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(ScriptedTransport {
            links: tx,
            subprotocols_seen: Mutex::new(Vec::new()),
        }),
        rx,
    )
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _url: &str, subprotocols: &[&str]) -> Result<TransportPair, TransportError> {
        self.subprotocols_seen
            .lock()
            .unwrap()
            .extend(subprotocols.iter().map(|s| s.to_string()));

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        self.links
            .send(ServerLink {
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| TransportError::Connect("connection refused".to_string()))?;

        Ok(TransportPair {
            sink: Box::new(ChanSink {
                tx: Some(out_tx),
                closed: closed_tx,
            }),
            stream: Box::new(ChanStream {
                rx: in_rx,
                closed: closed_rx,
            }),
        })
    }
}

struct ChanSink {
    tx: Option<mpsc::UnboundedSender<String>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl TransportSink for ChanSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.send(text).ok())
            .ok_or_else(|| TransportError::Send("connection closed".to_string()))
    }

    async fn close(&mut self) {
        self.tx = None;
        let _ = self.closed.send(true);
    }
}

struct ChanStream {
    rx: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl TransportStream for ChanStream {
    async fn recv(&mut self) -> Option<String> {
        if *self.closed.borrow() {
            return None;
        }
        tokio::select! {
            msg = self.rx.recv() => msg,
            _ = self.closed.changed() => None,
        }
    }
}

// ── Recording observer ───────────────────────────────────────────────────────

#[derive(Default)]
struct Recording {
    connected: Mutex<Vec<(String, String)>>,
    state_updates: Mutex<Vec<Value>>,
    events: Mutex<Vec<Value>>,
    errors: Mutex<Vec<ErrorPayload>>,
    pongs: AtomicUsize,
    disconnects: AtomicUsize,
}

impl SessionObserver for Recording {
    fn connected(&self, thread_id: &str, session_id: &str) {
        self.connected
            .lock()
            .unwrap()
            .push((thread_id.to_string(), session_id.to_string()));
    }

    fn disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn error(&self, payload: ErrorPayload) {
        self.errors.lock().unwrap().push(payload);
    }

    fn state_update(&self, payload: Value) {
        self.state_updates.lock().unwrap().push(payload);
    }

    fn event(&self, payload: Value) {
        self.events.lock().unwrap().push(payload);
    }

    fn pong(&self) {
        self.pongs.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn base_config(dir: &tempfile::TempDir) -> ClientConfig {
    let mut config = ClientConfig::new("ws://host/ltp");
    config.client_id = Some("c1".to_string());
    config.heartbeat.enabled = false;
    config.storage_path = Some(dir.path().join("ids.json"));
    config
}

fn ack_frame(thread_id: &str, session_id: &str) -> Value {
    json!({
        "type": "handshake_ack",
        "ltp_version": "0.6",
        "thread_id": thread_id,
        "session_id": session_id,
        "server_capabilities": ["state-update", "events", "ping-pong"],
        "heartbeat_interval_ms": 15_000,
    })
}

/// A server-built signed envelope carrying every field inbound validation
/// demands.
fn server_signed_frame(mac_key: &str, payload: Value) -> Value {
    let now = now_ms();
    let nonce = format!("hmac-{}-{}", "ab".repeat(16), now);
    let mut frame = json!({
        "type": "state_update",
        "thread_id": "t1",
        "session_id": "s1",
        "timestamp": now,
        "nonce": nonce,
        "payload": payload,
        "meta": {"client_id": "server"},
        "content_encoding": "json",
    });
    let signature = mac::hmac_sha256_hex(
        mac_key.as_bytes(),
        canonical_string(&frame).unwrap().as_bytes(),
    );
    frame["signature"] = json!(signature);
    frame
}

async fn connect_and_ack(
    client: &LtpClient,
    links: &mut mpsc::UnboundedReceiver<ServerLink>,
) -> ServerLink {
    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.expect("client never opened");
    let hello = link.next_frame().await;
    assert_eq!(hello["type"], "handshake_init");
    link.send(ack_frame("t1", "s1"));
    connect.await.unwrap().expect("connect failed");
    link
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_session_sends_unsigned_state_update() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let client = LtpClient::with_transport_and_observer(
        base_config(&dir),
        transport.clone(),
        Arc::new(NoopObserver),
    );

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();
    let init = link.next_frame().await;
    assert_eq!(init["type"], "handshake_init");
    assert_eq!(init["client_id"], "c1");
    assert_eq!(init["ltp_version"], "0.6");
    assert!(init["metadata"]["sdk_version"].is_string());
    link.send(ack_frame("t1", "s1"));
    connect.await.unwrap().unwrap();

    assert!(client.is_active());
    assert_eq!(client.thread_id().as_deref(), Some("t1"));
    assert_eq!(client.session_id().as_deref(), Some("s1"));
    assert_eq!(
        transport.subprotocols_seen.lock().unwrap().as_slice(),
        &["ltp.v0.6".to_string()]
    );

    client
        .send_state_update("minimal", json!({"mood": "curious"}))
        .await
        .unwrap();
    let frame = link.next_frame().await;
    assert_eq!(frame["type"], "state_update");
    assert_eq!(frame["thread_id"], "t1");
    assert_eq!(frame["session_id"], "s1");
    assert_eq!(frame["payload"], json!({"kind": "minimal", "data": {"mood": "curious"}}));
    assert_eq!(frame["meta"]["client_id"], "c1");
    assert_eq!(frame["content_encoding"], "json");
    assert!(frame.get("signature").is_none());

    client.disconnect().await;
    assert_eq!(client.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn signed_session_emits_hmac_nonce_and_valid_signature() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.session_mac_key = Some("K".to_string());
    let client =
        LtpClient::with_transport_and_observer(config, transport, Arc::new(NoopObserver));

    let mut link = connect_and_ack(&client, &mut links).await;

    client
        .send_state_update("minimal", json!({"mood": "curious"}))
        .await
        .unwrap();
    let frame = link.next_frame().await;

    let nonce = frame["nonce"].as_str().unwrap();
    let parts: Vec<&str> = nonce.splitn(3, '-').collect();
    assert_eq!(parts[0], "hmac");
    assert_eq!(parts[1].len(), 32);
    assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
    assert!(parts[2].parse::<i64>().is_ok());

    let expected = mac::hmac_sha256_hex(
        b"K",
        canonical_string(&frame).unwrap().as_bytes(),
    );
    assert_eq!(frame["signature"].as_str().unwrap(), expected);

    client.disconnect().await;
}

#[tokio::test]
async fn consecutive_events_are_hash_chained() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.session_mac_key = Some("K".to_string());
    let client =
        LtpClient::with_transport_and_observer(config, transport, Arc::new(NoopObserver));

    let mut link = connect_and_ack(&client, &mut links).await;

    let mut frames = Vec::new();
    for i in 0..3 {
        client.send_event("e", json!({"i": i})).await.unwrap();
        frames.push(link.next_frame().await);
    }

    assert!(frames[0].get("prev_message_hash").is_none());
    for i in 1..frames.len() {
        assert_eq!(
            frames[i]["prev_message_hash"].as_str().unwrap(),
            ltp_proto::canonical_hash(&frames[i - 1]).unwrap()
        );
    }

    client.disconnect().await;
}

#[tokio::test]
async fn replayed_inbound_frame_fires_handler_once() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.session_mac_key = Some("K".to_string());
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(config, transport, observer.clone());

    let link = connect_and_ack(&client, &mut links).await;

    let frame = server_signed_frame("K", json!({"kind": "minimal", "data": {"n": 1}}));
    link.send(frame.clone());
    link.send(frame);

    wait_until(|| !observer.state_updates.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(observer.state_updates.lock().unwrap().len(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn ecdh_handshake_derives_session_keys() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.enable_ecdh_key_exchange = true;
    config.secret_key = Some("S".to_string());
    let client =
        LtpClient::with_transport_and_observer(config, transport, Arc::new(NoopObserver));

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();
    let init = link.next_frame().await;

    let client_public = init["client_ecdh_public_key"].as_str().unwrap();
    assert_eq!(client_public.len(), 130);
    assert_eq!(init["key_agreement"]["algorithm"], "secp256r1");

    // The client attests its own ephemeral key with the shared secret.
    let client_ts = init["client_ecdh_timestamp"].as_i64().unwrap();
    let expected = mac::hmac_sha256_hex(
        b"S",
        format!("{client_public}:c1:{client_ts}").as_bytes(),
    );
    assert_eq!(init["client_ecdh_signature"].as_str().unwrap(), expected);

    // Server side of the exchange.
    let server_pair = EcdhKeyPair::generate();
    let server_public = server_pair.public_hex().to_string();
    let server_ts = now_ms();
    let server_sig = mac::hmac_sha256_hex(
        b"S",
        format!("{server_public}:s1:{server_ts}").as_bytes(),
    );
    let mut ack = ack_frame("t1", "s1");
    ack["server_ecdh_public_key"] = json!(server_public);
    ack["server_ecdh_signature"] = json!(server_sig);
    ack["server_ecdh_timestamp"] = json!(server_ts);
    link.send(ack);

    connect.await.unwrap().unwrap();
    assert!(client.is_active());

    // Outbound envelopes now verify under the derived MAC key.
    let shared = server_pair.agree(client_public).unwrap();
    let keys = kdf::derive_session_keys(&shared, "s1").unwrap();

    client.send_event("keyed", json!({})).await.unwrap();
    let frame = link.next_frame().await;
    let expected = mac::hmac_sha256_hex(
        keys.mac_key.as_bytes(),
        canonical_string(&frame).unwrap().as_bytes(),
    );
    assert_eq!(frame["signature"].as_str().unwrap(), expected);
    assert!(frame["nonce"].as_str().unwrap().starts_with("hmac-"));

    client.disconnect().await;
}

#[tokio::test]
async fn tampered_server_attestation_closes_the_client() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.enable_ecdh_key_exchange = true;
    config.secret_key = Some("S".to_string());
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(config, transport, observer.clone());

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();
    let _init = link.next_frame().await;

    let server_pair = EcdhKeyPair::generate();
    let server_public = server_pair.public_hex().to_string();
    let server_ts = now_ms();
    let mut signature = mac::hmac_sha256_hex(
        b"S",
        format!("{server_public}:s1:{server_ts}").as_bytes(),
    );
    // One corrupted hex digit.
    let flipped = if signature.starts_with('0') { "1" } else { "0" };
    signature.replace_range(0..1, flipped);

    let mut ack = ack_frame("t1", "s1");
    ack["server_ecdh_public_key"] = json!(server_public);
    ack["server_ecdh_signature"] = json!(signature);
    ack["server_ecdh_timestamp"] = json!(server_ts);
    link.send(ack);

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(ltp_client::LtpError::EcdhAuthFailed(_))));
    assert_eq!(client.phase(), SessionPhase::Closed);

    let errors = observer.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code, "ECDH_AUTH_FAILED");
}

#[tokio::test]
async fn rejected_resume_falls_back_to_fresh_init_on_the_same_connection() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("ids.json");
    std::fs::write(
        &storage,
        json!({"c1": {"thread_id": "t1", "session_id": "s1"}}).to_string(),
    )
    .unwrap();

    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.storage_path = Some(storage.clone());
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(config, transport, observer.clone());

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();

    let resume = link.next_frame().await;
    assert_eq!(resume["type"], "handshake_resume");
    assert_eq!(resume["thread_id"], "t1");

    link.send(json!({
        "type": "handshake_reject",
        "ltp_version": "0.6",
        "reason": "unknown_thread",
        "suggest_new": true,
    }));

    let init = link.next_frame().await;
    assert_eq!(init["type"], "handshake_init");
    assert_eq!(init["client_id"], "c1");

    link.send(ack_frame("t2", "s2"));
    connect.await.unwrap().unwrap();

    assert!(client.is_active());
    assert_eq!(client.thread_id().as_deref(), Some("t2"));

    let stored: Value =
        serde_json::from_str(&std::fs::read_to_string(&storage).unwrap()).unwrap();
    assert_eq!(stored, json!({"c1": {"thread_id": "t2", "session_id": "s2"}}));
    assert_eq!(
        observer.connected.lock().unwrap().as_slice(),
        &[("t2".to_string(), "s2".to_string())]
    );

    client.disconnect().await;
}

#[tokio::test]
async fn rejected_init_surfaces_from_connect() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let client = LtpClient::with_transport_and_observer(
        base_config(&dir),
        transport,
        Arc::new(NoopObserver),
    );

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();
    let _init = link.next_frame().await;
    link.send(json!({
        "type": "handshake_reject",
        "ltp_version": "0.6",
        "reason": "not_welcome",
    }));

    match connect.await.unwrap() {
        Err(ltp_client::LtpError::HandshakeRejected(reason)) => {
            assert_eq!(reason, "not_welcome");
        }
        other => panic!("expected HandshakeRejected, got {other:?}"),
    }
    assert_eq!(client.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn heartbeat_timeout_triggers_resume_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.heartbeat.enabled = true;
    config.heartbeat.interval_ms = 20;
    config.heartbeat.timeout_ms = 80;
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 40;
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(config, transport, observer.clone());

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();
    let _init = link.next_frame().await;
    // The server dictates the heartbeat cadence in its ack.
    let mut ack = ack_frame("t1", "s1");
    ack["heartbeat_interval_ms"] = json!(20);
    link.send(ack);
    connect.await.unwrap().unwrap();

    // Answer the first ping so the heartbeat completes one healthy cycle.
    let ping = link.next_frame().await;
    assert_eq!(ping["type"], "ping");
    link.send(json!({
        "type": "pong",
        "thread_id": "t1",
        "session_id": "s1",
        "timestamp": now_ms(),
        "payload": {},
    }));
    wait_until(|| observer.pongs.load(Ordering::SeqCst) >= 1).await;

    // Go silent: the pong wait times out and the client reconnects with a
    // resume for the stored thread.
    wait_until(|| observer.disconnects.load(Ordering::SeqCst) >= 1).await;
    let mut link2 = links.recv().await.expect("no reconnect attempt");
    let resume = link2.next_frame().await;
    assert_eq!(resume["type"], "handshake_resume");
    assert_eq!(resume["thread_id"], "t1");
    assert_eq!(resume["resume_reason"], "automatic_reconnect");

    link2.send(ack_frame("t1", "s9"));
    wait_until(|| client.is_active()).await;
    assert_eq!(client.session_id().as_deref(), Some("s9"));

    client.disconnect().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_max_retries() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.reconnect.max_retries = 2;
    config.reconnect.base_delay_ms = 5;
    config.reconnect.max_delay_ms = 10;
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(config, transport, observer.clone());

    let link = connect_and_ack(&client, &mut links).await;

    // Kill the connection and refuse all further opens.
    drop(links);
    drop(link);

    wait_until(|| client.phase() == SessionPhase::Closed).await;
    assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_drops_late_sends() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(
        base_config(&dir),
        transport,
        observer.clone(),
    );

    let _link = connect_and_ack(&client, &mut links).await;

    client.disconnect().await;
    client.disconnect().await;
    assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);

    // Sends after close are silently dropped, and connect refuses.
    client.send_ping().await.unwrap();
    assert!(matches!(
        client.connect().await,
        Err(ltp_client::LtpError::Closed)
    ));
}

#[tokio::test]
async fn sends_before_handshake_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let client = LtpClient::with_transport_and_observer(
        base_config(&dir),
        transport,
        Arc::new(NoopObserver),
    );

    // Never connected: nothing panics, nothing surfaces.
    client
        .send_state_update("minimal", json!({"x": 1}))
        .await
        .unwrap();
    assert_eq!(client.phase(), SessionPhase::Disconnected);
    assert!(links.try_recv().is_err());
}

#[tokio::test]
async fn late_handshake_ack_is_surfaced_as_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(
        base_config(&dir),
        transport,
        observer.clone(),
    );

    let link = connect_and_ack(&client, &mut links).await;

    // A duplicate ack after the session is already active.
    link.send(ack_frame("t9", "s9"));

    wait_until(|| !observer.errors.lock().unwrap().is_empty()).await;
    let errors = observer.errors.lock().unwrap();
    assert_eq!(errors[0].error_code, "UNEXPECTED_HANDSHAKE_FRAME");
    assert!(errors[0].error_message.contains("handshake_ack"));
    drop(errors);

    // The violation is reported, but the established session is untouched.
    assert!(client.is_active());
    assert_eq!(client.thread_id().as_deref(), Some("t1"));
    assert_eq!(client.session_id().as_deref(), Some("s1"));

    client.disconnect().await;
}

#[tokio::test]
async fn silent_server_trips_the_handshake_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let mut config = base_config(&dir);
    config.handshake_timeout_ms = Some(50);
    let client = LtpClient::with_transport_and_observer(
        config,
        transport,
        Arc::new(NoopObserver),
    );

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut link = links.recv().await.unwrap();
    let _init = link.next_frame().await;
    // Say nothing.

    match connect.await.unwrap() {
        Err(ltp_client::LtpError::Handshake(reason)) => {
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected a handshake timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_envelope_reaches_observer_without_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut links) = scripted();
    let observer = Arc::new(Recording::default());
    let client = LtpClient::with_transport_and_observer(
        base_config(&dir),
        transport,
        observer.clone(),
    );

    let link = connect_and_ack(&client, &mut links).await;

    link.send(json!({
        "type": "error",
        "thread_id": "t1",
        "session_id": "s1",
        "timestamp": now_ms(),
        "payload": {
            "error_code": "rate_limited",
            "error_message": "slow down",
        },
    }));

    wait_until(|| !observer.errors.lock().unwrap().is_empty()).await;
    assert_eq!(
        observer.errors.lock().unwrap()[0].error_code,
        "rate_limited"
    );
    assert!(client.is_active());

    client.disconnect().await;
}
