//! HMAC-SHA256 signatures.
//!
//! Envelope signatures, ECDH key attestations, and routing tags are all
//! HMAC-SHA256 digests carried as lowercase hex. Verification goes through
//! [`constant_time_eq`] to prevent timing side channels.

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `input`, returning the 32-byte digest as
/// lowercase hex.
pub fn hmac_sha256_hex(key: &[u8], input: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(input);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison to prevent timing side channels.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
