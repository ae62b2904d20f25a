//! SHA-256 digests for envelope commitments (hash chaining).

use sha2::{Digest, Sha256};

/// SHA-256 over `data`, as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
