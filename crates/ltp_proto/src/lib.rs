//! ltp_proto — wire types and canonical serialization for the Liminal
//! Thread Protocol
//!
//! All on-wire messages are JSON text frames. Envelope and handshake shapes
//! are versioned through the `ltp.v<major.minor>` subprotocol string.
//!
//! # Modules
//! - `envelope`  — the post-handshake message envelope and typed payloads
//! - `handshake` — init / resume / ack / reject messages
//! - `canonical` — the deterministic byte form used for hashing and signing
//! - `error`     — unified error type

pub mod canonical;
pub mod envelope;
pub mod error;
pub mod handshake;

pub use canonical::{canonical_hash, canonical_string};
pub use envelope::{
    normalize_timestamp_ms, ContentEncoding, Envelope, ErrorPayload, EventPayload, Meta,
    MessageType, StateUpdatePayload,
};
pub use error::ProtoError;
pub use handshake::{HandshakeAck, HandshakeInit, HandshakeReject, HandshakeResume, KeyAgreement};

/// Protocol version spoken by this implementation.
pub const LTP_VERSION: &str = "0.6";

/// Subprotocol string offered during the WebSocket upgrade.
pub fn subprotocol() -> String {
    format!("ltp.v{LTP_VERSION}")
}
