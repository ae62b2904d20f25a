//! Client configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};

pub const DEFAULT_INTENT: &str = "resonant_link";
pub const DEFAULT_MAX_MESSAGE_AGE_MS: i64 = 60_000;
pub const CLOCK_SKEW_TOLERANCE_MS: i64 = 5_000;

/// Exponential backoff parameters for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectStrategy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectStrategy {
    /// Delay before attempt `attempt` (zero-based):
    /// `min(base_delay_ms * 2^attempt, max_delay_ms)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

/// Heartbeat ping/pong configuration. The interval may be overridden by the
/// server in `handshake_ack`.
#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 15_000,
            timeout_ms: 45_000,
        }
    }
}

/// Everything a client needs to know before `connect()`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Stable client identity. Auto-generated (`client-<uuid>`) when absent.
    pub client_id: Option<String>,
    pub device_fingerprint: Option<String>,
    pub intent: String,
    pub capabilities: Vec<String>,
    /// Free-form handshake metadata. `sdk_version` and `platform` are always
    /// stamped in alongside.
    pub metadata: Map<String, Value>,
    pub default_context_tag: Option<String>,
    pub default_affect: Option<BTreeMap<String, f64>>,
    /// Identity store location; `~/.ltp_client.json` when absent.
    pub storage_path: Option<PathBuf>,
    pub reconnect: ReconnectStrategy,
    pub heartbeat: HeartbeatOptions,
    /// Session-scoped MAC key (hex or raw string, used as given).
    pub session_mac_key: Option<String>,
    /// Long-term shared secret: fallback MAC key and ECDH attestation key.
    pub secret_key: Option<String>,
    /// Defaults to "a MAC key is configured"; forced on once ECDH-derived
    /// session keys are installed.
    pub require_signature_verification: Option<bool>,
    /// Bound on the whole open-to-ack exchange. Unbounded by default;
    /// transport errors are then the only way a handshake fails.
    pub handshake_timeout_ms: Option<u64>,
    pub max_message_age_ms: i64,
    pub enable_ecdh_key_exchange: bool,
    pub enable_metadata_encryption: bool,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: None,
            device_fingerprint: None,
            intent: DEFAULT_INTENT.to_string(),
            capabilities: vec![
                "state-update".to_string(),
                "events".to_string(),
                "ping-pong".to_string(),
            ],
            metadata: Map::new(),
            default_context_tag: None,
            default_affect: None,
            storage_path: None,
            reconnect: ReconnectStrategy::default(),
            heartbeat: HeartbeatOptions::default(),
            session_mac_key: None,
            secret_key: None,
            require_signature_verification: None,
            handshake_timeout_ms: None,
            max_message_age_ms: DEFAULT_MAX_MESSAGE_AGE_MS,
            enable_ecdh_key_exchange: false,
            enable_metadata_encryption: false,
        }
    }

    /// The key used for envelope MACs before ECDH-derived keys exist:
    /// `session_mac_key`, falling back to the long-term secret.
    pub fn configured_mac_key(&self) -> Option<&str> {
        self.session_mac_key
            .as_deref()
            .or(self.secret_key.as_deref())
    }

    /// The key used to sign and verify ephemeral ECDH public keys. Only the
    /// long-term secret fills this role.
    pub fn ecdh_signing_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    pub fn require_signature_verification(&self) -> bool {
        self.require_signature_verification
            .unwrap_or_else(|| self.configured_mac_key().is_some())
    }
}
