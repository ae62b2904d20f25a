//! Ephemeral P-256 (secp256r1) key agreement.
//!
//! A fresh keypair is generated per connection attempt. Public keys travel
//! as uncompressed X9.62 points (65 bytes, 130 hex chars). The private half
//! never leaves this module: [`EcdhKeyPair::agree`] consumes the keypair, so
//! the secret scalar is dropped (and zeroized) as soon as the shared secret
//! exists.

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Ephemeral ECDH keypair bound to a single connection attempt.
pub struct EcdhKeyPair {
    public_hex: String,
    secret: SecretKey,
}

impl EcdhKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public_hex = hex::encode(secret.public_key().to_encoded_point(false).as_bytes());
        Self { public_hex, secret }
    }

    /// Uncompressed X9.62 public point, lowercase hex.
    pub fn public_hex(&self) -> &str {
        &self.public_hex
    }

    /// Derive the ECDH shared secret with a peer public key.
    ///
    /// Consumes the keypair; the ephemeral secret is zeroized on drop.
    pub fn agree(self, peer_public_hex: &str) -> Result<Zeroizing<String>, CryptoError> {
        let peer_bytes = hex::decode(peer_public_hex)?;
        let peer = PublicKey::from_sec1_bytes(&peer_bytes)
            .map_err(|_| CryptoError::KeyAgreement("invalid peer public key point".into()))?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        Ok(Zeroizing::new(hex::encode(shared.raw_secret_bytes())))
    }
}
