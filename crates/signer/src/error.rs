use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    /// A key string that is not `name:base64` with a valid Ed25519 key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The signature could not be decoded.
    #[error("malformed share signature: {0}")]
    MalformedSignature(String),

    #[error("share signature does not match")]
    SignatureMismatch,
}

pub type SignerResult<T> = std::result::Result<T, SignerError>;
