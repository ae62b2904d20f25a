//! The LTP envelope — every post-handshake wire message.
//!
//! Open-ended extension fields are part of the protocol: unknown keys on the
//! envelope and on `meta` round-trip untouched through flattened extras maps,
//! and the canonical form (see `canonical`) only ever commits to a fixed
//! field subset, so extensions never break signatures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// The nine wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    HandshakeInit,
    HandshakeResume,
    HandshakeAck,
    HandshakeReject,
    Ping,
    Pong,
    StateUpdate,
    Event,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandshakeInit => "handshake_init",
            Self::HandshakeResume => "handshake_resume",
            Self::HandshakeAck => "handshake_ack",
            Self::HandshakeReject => "handshake_reject",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::StateUpdate => "state_update",
            Self::Event => "event",
            Self::Error => "error",
        }
    }

    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::HandshakeInit | Self::HandshakeResume | Self::HandshakeAck | Self::HandshakeReject
        )
    }
}

/// Payload body encoding tag, always present on the wire. `Json` is the
/// default; `Toon` is reserved for a future compact codec and only passed
/// through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Json,
    Toon,
}

impl ContentEncoding {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Per-message metadata. All fields optional; unknown keys are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Context identifier (e.g. "focus_session", "evening_reflection").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_tag: Option<String>,
    /// Affect dimensions (e.g. valence, arousal) in [-1, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affect: Option<BTreeMap<String, f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Base envelope for all LTP messages other than the handshake family.
///
/// `thread_id`, `session_id`, and `timestamp` are always present on the wire;
/// with metadata encryption active they are zeroed and the true values live
/// in `encrypted_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub session_id: String,
    /// Milliseconds since epoch. Seconds-granularity values from older
    /// peers are normalized on receipt; see [`normalize_timestamp_ms`].
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "empty_object")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub content_encoding: ContentEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_message_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_tag: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(message_type: MessageType, thread_id: &str, session_id: &str, timestamp: i64) -> Self {
        Self {
            message_type,
            thread_id: thread_id.to_string(),
            session_id: session_id.to_string(),
            timestamp,
            payload: empty_object(),
            meta: None,
            content_encoding: ContentEncoding::Json,
            nonce: None,
            signature: None,
            prev_message_hash: None,
            encrypted_metadata: None,
            routing_tag: None,
            extra: Map::new(),
        }
    }

    /// Wire mapping, with null/empty optionals omitted.
    pub fn to_value(&self) -> Result<Value, ProtoError> {
        serde_json::to_value(self).map_err(ProtoError::Parse)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        serde_json::from_value(value).map_err(ProtoError::Parse)
    }
}

/// Normalize a wire timestamp to milliseconds. Values at or below 10^12 are
/// treated as seconds (older protocol revisions) and scaled.
pub fn normalize_timestamp_ms(timestamp: i64) -> i64 {
    if timestamp <= 1_000_000_000_000 {
        timestamp.saturating_mul(1000)
    } else {
        timestamp
    }
}

// ── Typed payload bodies ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdatePayload {
    /// "minimal", "full", or "delta".
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_code: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
