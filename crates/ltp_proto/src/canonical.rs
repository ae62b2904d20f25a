//! The canonical form — deterministic bytes for hashing and signing.
//!
//! Only a fixed subset of envelope fields is committed to:
//!
//!   { type, thread_id, session_id, timestamp, nonce, payload,
//!     prev_message_hash }
//!
//! `meta` and `content_encoding` are intentionally excluded so that metadata
//! mutations and encoding switches do not break signatures. Missing fields
//! default to the empty string, `0`, or the empty object per field type.
//!
//! Key ordering relies on serde_json's map representation, which keeps
//! object keys sorted at every nesting level; serialization is compact (no
//! insignificant whitespace) and preserves the integer/real distinction of
//! numbers exactly as received.

use serde_json::{json, Value};

use crate::error::ProtoError;

fn str_field(message: &Value, key: &str) -> String {
    message
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Produce the canonical UTF-8 string for a wire mapping.
pub fn canonical_string(message: &Value) -> Result<String, ProtoError> {
    let timestamp = message
        .get("timestamp")
        .filter(|v| v.is_number())
        .cloned()
        .unwrap_or_else(|| json!(0));
    let payload = message
        .get("payload")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let canonical = json!({
        "type": str_field(message, "type"),
        "thread_id": str_field(message, "thread_id"),
        "session_id": str_field(message, "session_id"),
        "timestamp": timestamp,
        "nonce": str_field(message, "nonce"),
        "payload": payload,
        "prev_message_hash": str_field(message, "prev_message_hash"),
    });

    serde_json::to_string(&canonical).map_err(ProtoError::Canonicalize)
}

/// SHA-256 over the canonical string, lowercase hex.
pub fn canonical_hash(message: &Value) -> Result<String, ProtoError> {
    Ok(ltp_crypto::hash::sha256_hex(
        canonical_string(message)?.as_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sorted_and_compact() {
        let message = json!({
            "type": "event",
            "thread_id": "t1",
            "session_id": "s1",
            "timestamp": 42,
            "nonce": "n",
            "payload": {"zebra": 1, "alpha": {"y": 2, "x": 1}},
        });
        let canonical = canonical_string(&message).unwrap();
        assert_eq!(
            canonical,
            r#"{"nonce":"n","payload":{"alpha":{"x":1,"y":2},"zebra":1},"prev_message_hash":"","session_id":"s1","thread_id":"t1","timestamp":42,"type":"event"}"#
        );
    }

    #[test]
    fn missing_fields_take_typed_defaults() {
        let canonical = canonical_string(&json!({"type": "ping"})).unwrap();
        assert!(canonical.contains(r#""thread_id":"""#));
        assert!(canonical.contains(r#""timestamp":0"#));
        assert!(canonical.contains(r#""payload":{}"#));
    }

    #[test]
    fn meta_and_content_encoding_do_not_affect_the_canonical_form() {
        let base = json!({
            "type": "state_update",
            "thread_id": "t1",
            "session_id": "s1",
            "timestamp": 7,
            "nonce": "n",
            "payload": {"kind": "minimal", "data": {}},
        });
        let mut extended = base.clone();
        extended["meta"] = json!({"client_id": "c1", "affect": {"valence": 0.5}});
        extended["content_encoding"] = json!("toon");
        extended["signature"] = json!("deadbeef");

        assert_eq!(
            canonical_string(&base).unwrap(),
            canonical_string(&extended).unwrap()
        );
        assert_eq!(
            canonical_hash(&base).unwrap(),
            canonical_hash(&extended).unwrap()
        );
    }

    #[test]
    fn integer_and_real_are_distinct() {
        let int_ts = json!({"type": "ping", "timestamp": 1});
        let real_ts = json!({"type": "ping", "timestamp": 1.0});
        assert_ne!(
            canonical_string(&int_ts).unwrap(),
            canonical_string(&real_ts).unwrap()
        );
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = canonical_hash(&json!({"type": "ping"})).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
