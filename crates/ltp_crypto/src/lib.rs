//! ltp_crypto — cryptographic primitives for the Liminal Thread Protocol
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Keys cross module boundaries as lowercase hex strings, matching the
//!   wire protocol; byte-level handling stays inside this crate.
//!
//! # Module layout
//! - `mac`   — HMAC-SHA256 signatures and constant-time comparison
//! - `hash`  — SHA-256 digests for envelope commitments
//! - `ecdh`  — ephemeral P-256 key agreement
//! - `kdf`   — HKDF-SHA256 and the session key schedule
//! - `aead`  — AES-256-GCM metadata encryption
//! - `error` — unified error type

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod mac;

pub use error::CryptoError;
