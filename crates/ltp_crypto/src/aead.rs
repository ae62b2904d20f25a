//! AES-256-GCM metadata encryption.
//!
//! Key size: 32 bytes. IV: 12 bytes (random per message). Tag: 16 bytes.
//!
//! Wire format (all hex, colon-separated):
//!
//!   ciphertext:iv:tag

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::error::CryptoError;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypt `plaintext` with a 32-byte hex key, producing a
/// `ciphertext:iv:tag` blob with a fresh random IV.
pub fn encrypt_blob(key_hex: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
    let key_bytes = Zeroizing::new(hex::decode(key_hex)?);
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|_| CryptoError::InvalidKey("AES-256-GCM key must be 32 bytes".into()))?;

    let iv = Aes256Gcm::generate_nonce(&mut OsRng);
    // RustCrypto appends the 16-byte tag to the ciphertext.
    let sealed = cipher
        .encrypt(&iv, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    Ok(format!(
        "{}:{}:{}",
        hex::encode(ciphertext),
        hex::encode(iv),
        hex::encode(tag)
    ))
}

/// Decrypt a `ciphertext:iv:tag` blob.
pub fn decrypt_blob(key_hex: &str, blob: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut parts = blob.split(':');
    let (Some(ct_hex), Some(iv_hex), Some(tag_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CryptoError::Decrypt);
    };

    let iv_bytes = hex::decode(iv_hex).map_err(|_| CryptoError::Decrypt)?;
    if iv_bytes.len() != IV_LEN {
        return Err(CryptoError::Decrypt);
    }
    let tag = hex::decode(tag_hex).map_err(|_| CryptoError::Decrypt)?;
    if tag.len() != TAG_LEN {
        return Err(CryptoError::Decrypt);
    }
    let mut sealed = hex::decode(ct_hex).map_err(|_| CryptoError::Decrypt)?;
    sealed.extend_from_slice(&tag);

    let key_bytes = Zeroizing::new(hex::decode(key_hex)?);
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|_| CryptoError::InvalidKey("AES-256-GCM key must be 32 bytes".into()))?;

    let iv = Nonce::from_slice(&iv_bytes);
    let plaintext = cipher
        .decrypt(iv, sealed.as_ref())
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(Zeroizing::new(plaintext))
}
