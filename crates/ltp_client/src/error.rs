use thiserror::Error;

use crate::transport::TransportError;
use ltp_crypto::CryptoError;
use ltp_proto::ProtoError;

#[derive(Debug, Error)]
pub enum LtpError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Server ECDH key authentication failed: {0}")]
    EcdhAuthFailed(String),

    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol failure: {0}")]
    Proto(#[from] ProtoError),

    #[error("Client is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LtpError>;
