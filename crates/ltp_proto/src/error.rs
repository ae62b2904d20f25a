use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Message parse failed: {0}")]
    Parse(serde_json::Error),

    #[error("Canonicalization failed: {0}")]
    Canonicalize(serde_json::Error),
}
