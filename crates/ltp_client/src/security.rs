//! Session security context.
//!
//! Bound to a single connection: created when `handshake_ack` arrives,
//! destroyed on disconnect. Key material lives behind `Zeroizing` so clearing
//! the context (or dropping it) wipes the keys from memory.

use std::collections::HashMap;

use zeroize::Zeroizing;

use crate::config::CLOCK_SKEW_TOLERANCE_MS;

pub struct SessionSecurity {
    mac_key: Option<Zeroizing<String>>,
    encryption_key: Option<Zeroizing<String>>,
    pub last_sent_hash: Option<String>,
    pub last_received_hash: Option<String>,
    seen_nonces: HashMap<String, i64>,
    last_eviction_ms: i64,
    pub max_message_age_ms: i64,
    pub clock_skew_tolerance_ms: i64,
    pub require_signature_verification: bool,
}

impl SessionSecurity {
    pub fn new(max_message_age_ms: i64) -> Self {
        Self {
            mac_key: None,
            encryption_key: None,
            last_sent_hash: None,
            last_received_hash: None,
            seen_nonces: HashMap::new(),
            last_eviction_ms: 0,
            max_message_age_ms,
            clock_skew_tolerance_ms: CLOCK_SKEW_TOLERANCE_MS,
            require_signature_verification: false,
        }
    }

    /// Adopt a pre-shared MAC key (no encryption key; metadata stays plain).
    pub fn set_mac_key(&mut self, mac_key: &str) {
        self.mac_key = Some(Zeroizing::new(mac_key.to_string()));
    }

    /// Install ECDH-derived session keys. Resets the nonce cache: a fresh
    /// key schedule means a fresh replay domain.
    pub fn install_session_keys(&mut self, encryption_key: &str, mac_key: &str) {
        self.encryption_key = Some(Zeroizing::new(encryption_key.to_string()));
        self.mac_key = Some(Zeroizing::new(mac_key.to_string()));
        self.seen_nonces.clear();
        self.require_signature_verification = true;
    }

    pub fn mac_key(&self) -> Option<&str> {
        self.mac_key.as_deref().map(String::as_str)
    }

    pub fn encryption_key(&self) -> Option<&str> {
        self.encryption_key.as_deref().map(String::as_str)
    }

    pub fn record_sent(&mut self, hash: String) {
        self.last_sent_hash = Some(hash);
    }

    pub fn record_received(&mut self, hash: String) {
        self.last_received_hash = Some(hash);
    }

    /// Whether `nonce` is already recorded inside its lifetime window.
    pub fn nonce_seen(&self, nonce: &str) -> bool {
        self.seen_nonces.contains_key(nonce)
    }

    /// Returns `false` if `nonce` was already observed inside its lifetime
    /// window; otherwise remembers it at `now_ms`.
    pub fn check_and_remember_nonce(&mut self, nonce: &str, now_ms: i64) -> bool {
        if self.seen_nonces.contains_key(nonce) {
            return false;
        }
        self.seen_nonces.insert(nonce.to_string(), now_ms);
        true
    }

    /// Drop nonce records older than twice the message age window. Runs at
    /// most once per window; callers can invoke it on every inbound frame.
    pub fn evict_expired_nonces(&mut self, now_ms: i64) {
        if now_ms - self.last_eviction_ms < self.max_message_age_ms {
            return;
        }
        self.last_eviction_ms = now_ms;
        let horizon = now_ms - 2 * self.max_message_age_ms;
        self.seen_nonces.retain(|_, seen_at| *seen_at > horizon);
    }

    /// Wipe key material and per-session state.
    pub fn clear(&mut self) {
        self.mac_key = None;
        self.encryption_key = None;
        self.last_sent_hash = None;
        self.last_received_hash = None;
        self.seen_nonces.clear();
        self.require_signature_verification = false;
    }
}
