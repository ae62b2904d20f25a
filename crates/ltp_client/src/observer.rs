//! Session observer — the application-facing callback surface.

use serde_json::Value;

use ltp_proto::ErrorPayload;

/// Receives session lifecycle and message notifications. Every method has a
/// no-op default, so implementors override only what they need.
///
/// Callbacks fire on the client's internal tasks; implementations should
/// hand heavy work off rather than block.
pub trait SessionObserver: Send + Sync {
    fn connected(&self, _thread_id: &str, _session_id: &str) {}

    fn disconnected(&self) {}

    /// A server-reported `error` envelope, or a local `ECDH_AUTH_FAILED`.
    fn error(&self, _payload: ErrorPayload) {}

    fn state_update(&self, _payload: Value) {}

    fn event(&self, _payload: Value) {}

    fn pong(&self) {}

    /// Every raw inbound frame, before validation. Useful for tracing and
    /// conformance tooling.
    fn message(&self, _raw: &Value) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
