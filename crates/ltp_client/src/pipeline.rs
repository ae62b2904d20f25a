//! Envelope pipeline — outbound build and inbound validation.
//!
//! Signature and hash-chain commitments are computed over the wire form on
//! both directions: the canonical bytes of a frame exactly as it crosses the
//! transport. With metadata encryption active the wire form carries zeroed
//! `thread_id`/`session_id`/`timestamp`, so commitments stay verifiable
//! without the encryption key, while freshness is judged against the
//! decrypted timestamp.
//!
//! Inbound rejection is silent toward the caller: every failure maps to a
//! [`DropReason`] that the session logs at debug level and otherwise
//! swallows.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use ltp_crypto::{aead, mac};
use ltp_proto::{
    canonical_hash, canonical_string, normalize_timestamp_ms, Envelope, MessageType, Meta,
};

use crate::error::LtpError;
use crate::security::SessionSecurity;

/// Why an inbound frame was dropped. Never surfaced to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum DropReason {
    #[error("frame is not a known envelope: {0}")]
    Malformed(String),

    #[error("hash chain mismatch")]
    ChainMismatch,

    #[error("required field missing: {0}")]
    MissingField(&'static str),

    #[error("signature missing or mismatched")]
    SignatureMismatch,

    #[error("metadata decryption failed")]
    MetadataDecrypt,

    #[error("timestamp outside freshness window")]
    Stale,

    #[error("nonce replayed")]
    ReplayedNonce,

    #[error("nonce malformed or spoofed")]
    BadNonce,

    #[error("canonicalization failed")]
    Canonical,
}

const REQUIRED_FIELDS: [&str; 9] = [
    "type",
    "thread_id",
    "session_id",
    "timestamp",
    "nonce",
    "payload",
    "meta",
    "content_encoding",
    "signature",
];

/// Per-client envelope pipeline. Holds the configuration that shapes frames;
/// all per-session state lives in [`SessionSecurity`].
pub(crate) struct Pipeline {
    client_id: String,
    enable_metadata_encryption: bool,
    legacy_nonce_warned: AtomicBool,
}

impl Pipeline {
    pub fn new(client_id: String, enable_metadata_encryption: bool) -> Self {
        Self {
            client_id,
            enable_metadata_encryption,
            legacy_nonce_warned: AtomicBool::new(false),
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Build the wire mapping for an outbound envelope: nonce, chain link,
    /// optional metadata encryption, signature, and the sent-hash record.
    pub fn build_outbound(
        &self,
        message_type: MessageType,
        payload: Value,
        meta: Meta,
        thread_id: &str,
        session_id: &str,
        now_ms: i64,
        security: &mut SessionSecurity,
    ) -> Result<Value, LtpError> {
        let mut envelope = Envelope::new(message_type, thread_id, session_id, now_ms);
        envelope.payload = payload;
        envelope.meta = Some(meta);
        envelope.nonce = Some(self.generate_nonce(security.mac_key(), now_ms));
        envelope.prev_message_hash = security.last_sent_hash.clone();

        if self.enable_metadata_encryption {
            if let Some(encryption_key) = security.encryption_key() {
                let metadata = json!({
                    "thread_id": thread_id,
                    "session_id": session_id,
                    "timestamp": now_ms,
                });
                let plaintext =
                    serde_json::to_string(&metadata).map_err(ltp_proto::ProtoError::Canonicalize)?;
                envelope.encrypted_metadata =
                    Some(aead::encrypt_blob(encryption_key, plaintext.as_bytes())?);
                if let Some(mac_key) = security.mac_key() {
                    envelope.routing_tag = Some(routing_tag(mac_key, thread_id, session_id)?);
                }
                // The server routes by tag; true values ride only in the blob.
                envelope.thread_id = String::new();
                envelope.session_id = String::new();
                envelope.timestamp = 0;
            }
        }

        let mut wire = envelope.to_value()?;
        if let Some(mac_key) = security.mac_key() {
            let canonical = canonical_string(&wire)?;
            let signature = mac::hmac_sha256_hex(mac_key.as_bytes(), canonical.as_bytes());
            wire["signature"] = Value::String(signature);
        }

        security.record_sent(canonical_hash(&wire)?);
        Ok(wire)
    }

    /// HMAC nonce when a MAC key exists (hides the client identity), legacy
    /// `client_id-ts-random` otherwise.
    fn generate_nonce(&self, mac_key: Option<&str>, now_ms: i64) -> String {
        let mut random = [0u8; 16];
        OsRng.fill_bytes(&mut random);
        let random_hex = hex::encode(random);

        match mac_key {
            Some(key) => {
                let digest = mac::hmac_sha256_hex(
                    key.as_bytes(),
                    format!("{now_ms}-{random_hex}").as_bytes(),
                );
                format!("hmac-{}-{}", &digest[..32], now_ms)
            }
            None => {
                if !self.legacy_nonce_warned.swap(true, Ordering::Relaxed) {
                    warn!("no session MAC key; using legacy nonces that embed the client id");
                }
                format!("{}-{}-{}", self.client_id, now_ms, random_hex)
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Validate a parsed inbound frame. On success returns the typed
    /// envelope with its timestamp normalized to milliseconds and metadata
    /// fields decrypted.
    pub fn validate_inbound(
        &self,
        mut raw: Value,
        security: &mut SessionSecurity,
        now_ms: i64,
    ) -> Result<Envelope, DropReason> {
        let message_type = parse_type(&raw)?;

        // Hash chain continuity over the wire form. The first frame after
        // the handshake is unchained.
        if let Some(prev) = raw.get("prev_message_hash").and_then(Value::as_str) {
            if let Some(last) = &security.last_received_hash {
                if prev != last {
                    return Err(DropReason::ChainMismatch);
                }
            }
        }
        if !message_type.is_handshake() {
            let hash = canonical_hash(&raw).map_err(|_| DropReason::Canonical)?;
            security.record_received(hash);
        }

        let verify = security.require_signature_verification
            && !matches!(
                message_type,
                MessageType::HandshakeAck | MessageType::HandshakeReject
            );

        if verify {
            for field in REQUIRED_FIELDS {
                if raw.get(field).is_none() {
                    return Err(DropReason::MissingField(field));
                }
            }
            let Some(mac_key) = security.mac_key() else {
                return Err(DropReason::SignatureMismatch);
            };
            let canonical = canonical_string(&raw).map_err(|_| DropReason::Canonical)?;
            let expected = mac::hmac_sha256_hex(mac_key.as_bytes(), canonical.as_bytes());
            let provided = raw
                .get("signature")
                .and_then(Value::as_str)
                .ok_or(DropReason::SignatureMismatch)?;
            if !mac::constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
                return Err(DropReason::SignatureMismatch);
            }
        }

        if raw.get("encrypted_metadata").is_some() {
            if let Some(encryption_key) = security.encryption_key() {
                self.restore_metadata(&mut raw, encryption_key)?;
            }
        }

        if verify {
            let timestamp = raw.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
            check_freshness(timestamp, now_ms, security)?;

            let nonce = raw
                .get("nonce")
                .and_then(Value::as_str)
                .ok_or(DropReason::MissingField("nonce"))?;
            let parsed = parse_nonce(nonce).ok_or(DropReason::BadNonce)?;
            if let ParsedNonce::Legacy { client_id, .. } = &parsed {
                let meta_client = raw
                    .get("meta")
                    .and_then(|m| m.get("client_id"))
                    .and_then(Value::as_str);
                if let Some(meta_client) = meta_client {
                    if meta_client != client_id {
                        return Err(DropReason::BadNonce);
                    }
                }
            }
            if security.nonce_seen(nonce) {
                return Err(DropReason::ReplayedNonce);
            }
            check_freshness(parsed.timestamp_ms(), now_ms, security)?;
            security.check_and_remember_nonce(nonce, now_ms);
        }

        security.evict_expired_nonces(now_ms);

        let mut envelope =
            Envelope::from_value(raw).map_err(|e| DropReason::Malformed(e.to_string()))?;
        envelope.timestamp = normalize_timestamp_ms(envelope.timestamp);
        Ok(envelope)
    }

    fn restore_metadata(&self, raw: &mut Value, encryption_key: &str) -> Result<(), DropReason> {
        let blob = raw
            .get("encrypted_metadata")
            .and_then(Value::as_str)
            .ok_or(DropReason::MetadataDecrypt)?;
        let plaintext =
            aead::decrypt_blob(encryption_key, blob).map_err(|_| DropReason::MetadataDecrypt)?;
        let metadata: Value =
            serde_json::from_slice(&plaintext).map_err(|_| DropReason::MetadataDecrypt)?;

        let thread_id = metadata
            .get("thread_id")
            .and_then(Value::as_str)
            .ok_or(DropReason::MetadataDecrypt)?;
        let session_id = metadata
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or(DropReason::MetadataDecrypt)?;
        let timestamp = metadata
            .get("timestamp")
            .and_then(Value::as_i64)
            .ok_or(DropReason::MetadataDecrypt)?;

        raw["thread_id"] = json!(thread_id);
        raw["session_id"] = json!(session_id);
        raw["timestamp"] = json!(timestamp);
        Ok(())
    }
}

/// Routing tag: first 16 bytes (32 hex chars) of
/// HMAC-SHA256(mac_key_bytes, thread_id ":" session_id).
fn routing_tag(mac_key_hex: &str, thread_id: &str, session_id: &str) -> Result<String, LtpError> {
    let key_bytes = hex::decode(mac_key_hex).map_err(ltp_crypto::CryptoError::HexDecode)?;
    let digest = mac::hmac_sha256_hex(&key_bytes, format!("{thread_id}:{session_id}").as_bytes());
    Ok(digest[..32].to_string())
}

fn parse_type(raw: &Value) -> Result<MessageType, DropReason> {
    let tag = raw
        .get("type")
        .cloned()
        .ok_or(DropReason::MissingField("type"))?;
    serde_json::from_value(tag).map_err(|e| DropReason::Malformed(e.to_string()))
}

fn check_freshness(
    timestamp: i64,
    now_ms: i64,
    security: &SessionSecurity,
) -> Result<(), DropReason> {
    let age = now_ms - normalize_timestamp_ms(timestamp);
    if age > security.max_message_age_ms || age < -security.clock_skew_tolerance_ms {
        return Err(DropReason::Stale);
    }
    Ok(())
}

enum ParsedNonce {
    /// `hmac-<32 hex>-<ts_ms>` — v0.6+, identity-hiding.
    Hmac { ts_ms: i64 },
    /// `<client_id>-<ts_ms>-<16 random bytes hex>` — pre-v0.6 interop.
    Legacy { client_id: String, ts_ms: i64 },
}

impl ParsedNonce {
    fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Hmac { ts_ms } | Self::Legacy { ts_ms, .. } => *ts_ms,
        }
    }
}

fn parse_nonce(nonce: &str) -> Option<ParsedNonce> {
    if let Some(rest) = nonce.strip_prefix("hmac-") {
        let (digest, ts) = rest.split_once('-')?;
        if digest.len() != 32 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        return Some(ParsedNonce::Hmac {
            ts_ms: ts.parse().ok()?,
        });
    }

    // Legacy: the random suffix and timestamp are fixed-shape, the client id
    // may itself contain dashes, so split from the right.
    let mut parts = nonce.rsplitn(3, '-');
    let random = parts.next()?;
    let ts = parts.next()?;
    let client_id = parts.next()?;
    if random.len() != 32 || !random.chars().all(|c| c.is_ascii_hexdigit()) || client_id.is_empty()
    {
        return None;
    }
    Some(ParsedNonce::Legacy {
        client_id: client_id.to_string(),
        ts_ms: ts.parse().ok()?,
    })
}
