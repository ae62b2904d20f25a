//! ltp_client — client-side session runtime for the Liminal Thread Protocol
//!
//! An LTP client establishes an authenticated, resumable "thread" with a
//! server over a full-duplex text stream (WebSocket by default), then
//! exchanges structured envelopes whose integrity, freshness, and metadata
//! privacy are protected by a negotiated session cryptographic context.
//!
//! # Module layout
//! - `client`    — the session state machine (handshake, heartbeat, reconnect)
//! - `pipeline`  — outbound envelope build / inbound validation
//! - `security`  — per-session key material, hash chain, replay cache
//! - `transport` — the bidirectional text-stream seam + WebSocket default
//! - `config`    — connection, reconnect, heartbeat, and security knobs
//! - `observer`  — application callback surface
//! - `error`     — unified error type
//!
//! # Example
//!
//! ```no_run
//! use ltp_client::{ClientConfig, LtpClient};
//!
//! # async fn run() -> ltp_client::Result<()> {
//! let mut config = ClientConfig::new("wss://example.org/ltp");
//! config.session_mac_key = Some("shared-secret".to_string());
//!
//! let client = LtpClient::new(config);
//! client.connect().await?;
//! client
//!     .send_state_update("minimal", serde_json::json!({"mood": "curious"}))
//!     .await?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observer;
mod pipeline;
pub mod security;
pub mod transport;

pub use client::{LtpClient, SendOptions, SessionPhase};
pub use config::{ClientConfig, HeartbeatOptions, ReconnectStrategy};
pub use error::{LtpError, Result};
pub use observer::{NoopObserver, SessionObserver};
pub use transport::{Transport, TransportError, TransportPair, TransportSink, TransportStream};

pub use ltp_proto::{ErrorPayload, EventPayload, StateUpdatePayload};
