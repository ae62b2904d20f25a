//! Handshake messages: init, resume, ack, reject.
//!
//! The ECDH fields carry an authenticated ephemeral key exchange: the public
//! point plus an HMAC attestation over `public:entity:timestamp` made with
//! the long-term shared secret.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::MessageType;
use crate::error::ProtoError;
use crate::LTP_VERSION;

/// Key agreement descriptor advertised during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAgreement {
    pub algorithm: String,
    pub method: String,
    pub hkdf: String,
}

impl Default for KeyAgreement {
    fn default() -> Self {
        Self {
            algorithm: "secp256r1".to_string(),
            method: "ecdh".to_string(),
            hkdf: "sha256".to_string(),
        }
    }
}

/// Client → server: open a fresh thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeInit {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub ltp_version: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ecdh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ecdh_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ecdh_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_agreement: Option<KeyAgreement>,
}

impl HandshakeInit {
    pub fn new(client_id: &str) -> Self {
        Self {
            message_type: MessageType::HandshakeInit,
            ltp_version: LTP_VERSION.to_string(),
            client_id: client_id.to_string(),
            device_fingerprint: None,
            intent: None,
            capabilities: Vec::new(),
            metadata: Map::new(),
            client_ecdh_public_key: None,
            client_ecdh_signature: None,
            client_ecdh_timestamp: None,
            key_agreement: None,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtoError> {
        serde_json::to_value(self).map_err(ProtoError::Parse)
    }
}

/// Client → server: re-bind to a stored thread after a reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResume {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub ltp_version: String,
    pub client_id: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ecdh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ecdh_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ecdh_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_agreement: Option<KeyAgreement>,
}

impl HandshakeResume {
    pub fn new(client_id: &str, thread_id: &str, resume_reason: &str) -> Self {
        Self {
            message_type: MessageType::HandshakeResume,
            ltp_version: LTP_VERSION.to_string(),
            client_id: client_id.to_string(),
            thread_id: thread_id.to_string(),
            resume_reason: Some(resume_reason.to_string()),
            client_ecdh_public_key: None,
            client_ecdh_signature: None,
            client_ecdh_timestamp: None,
            key_agreement: None,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtoError> {
        serde_json::to_value(self).map_err(ProtoError::Parse)
    }
}

/// Server → client: the thread is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAck {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub ltp_version: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub server_capabilities: Vec<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Set when the server honored a resume rather than opening a new thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed: Option<bool>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ecdh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ecdh_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ecdh_timestamp: Option<i64>,
}

fn default_heartbeat_interval() -> u64 {
    15_000
}

impl HandshakeAck {
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        serde_json::from_value(value).map_err(ProtoError::Parse)
    }
}

/// Server → client: the handshake (usually a resume) was refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeReject {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub ltp_version: String,
    #[serde(default)]
    pub reason: String,
    /// Server hint that the client should retry with a fresh init.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest_new: Option<bool>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl HandshakeReject {
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        serde_json::from_value(value).map_err(ProtoError::Parse)
    }
}
