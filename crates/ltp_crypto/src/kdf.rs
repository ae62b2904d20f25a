//! HKDF-SHA256 (RFC 5869) and the LTP session key schedule.
//!
//! A single ECDH shared secret expands into three keys with distinct info
//! strings, salted with the session id so resumed threads never reuse key
//! material across sessions:
//!
//!   salt = "ltp-v0.5-" || session_id
//!   encryption_key = HKDF(secret, salt, "ltp-encryption-key", 32)
//!   mac_key        = HKDF(secret, salt, "ltp-mac-key",        32)
//!   iv_key         = HKDF(secret, salt, "ltp-iv-key",         16)

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

const SALT_PREFIX: &str = "ltp-v0.5-";

/// Expand `secret_hex` into `len` bytes of key material, returned as hex.
///
/// An empty salt falls back to 32 zero bytes, per RFC 5869.
pub fn hkdf_hex(
    secret_hex: &str,
    salt: &str,
    info: &str,
    len: usize,
) -> Result<Zeroizing<String>, CryptoError> {
    let mut secret = hex::decode(secret_hex)?;

    let salt_bytes = if salt.is_empty() {
        vec![0u8; 32]
    } else {
        salt.as_bytes().to_vec()
    };

    let hk = Hkdf::<Sha256>::new(Some(&salt_bytes), &secret);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    let expanded = hk
        .expand(info.as_bytes(), okm.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()));
    secret.zeroize();
    expanded?;

    Ok(Zeroizing::new(hex::encode(&*okm)))
}

/// Keys derived for one session. Zeroized on drop.
pub struct SessionKeys {
    /// 32-byte AES-256-GCM key, hex.
    pub encryption_key: Zeroizing<String>,
    /// 32-byte HMAC key, hex.
    pub mac_key: Zeroizing<String>,
    /// 16-byte IV seed, hex. Reserved for deterministic-IV schemes.
    pub iv_key: Zeroizing<String>,
}

/// Derive the per-session key set from an ECDH shared secret.
pub fn derive_session_keys(
    shared_secret_hex: &str,
    session_id: &str,
) -> Result<SessionKeys, CryptoError> {
    let salt = format!("{SALT_PREFIX}{session_id}");

    Ok(SessionKeys {
        encryption_key: hkdf_hex(shared_secret_hex, &salt, "ltp-encryption-key", 32)?,
        mac_key: hkdf_hex(shared_secret_hex, &salt, "ltp-mac-key", 32)?,
        iv_key: hkdf_hex(shared_secret_hex, &salt, "ltp-iv-key", 16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc5869_test_case_1() {
        // RFC 5869 appendix A.1, truncated to the first 32 octets of OKM.
        let ikm = "0b".repeat(22);
        let hk = Hkdf::<Sha256>::new(
            Some(&hex::decode("000102030405060708090a0b0c").unwrap()),
            &hex::decode(&ikm).unwrap(),
        );
        let mut okm = [0u8; 42];
        hk.expand(&hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap(), &mut okm)
            .unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn session_keys_have_expected_lengths_and_differ() {
        let secret = "ab".repeat(32);
        let keys = derive_session_keys(&secret, "session-1").unwrap();
        assert_eq!(keys.encryption_key.len(), 64);
        assert_eq!(keys.mac_key.len(), 64);
        assert_eq!(keys.iv_key.len(), 32);
        assert_ne!(*keys.encryption_key, *keys.mac_key);
    }

    #[test]
    fn session_id_separates_key_material() {
        let secret = "cd".repeat(32);
        let a = derive_session_keys(&secret, "session-a").unwrap();
        let b = derive_session_keys(&secret, "session-b").unwrap();
        assert_ne!(*a.encryption_key, *b.encryption_key);
        assert_ne!(*a.mac_key, *b.mac_key);
    }

    #[test]
    fn non_hex_secret_is_rejected() {
        assert!(derive_session_keys("zz", "s").is_err());
    }
}
