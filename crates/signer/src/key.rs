//! Ed25519 key types and the `name:base64` key string format.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt;

/// Split `name:base64` and decode the payload, requiring `expected_len` bytes.
fn decode_key_string(s: &str, expected_len: usize) -> SignerResult<(String, Vec<u8>)> {
    let (name, b64) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| SignerError::InvalidKey("expected 'name:base64' format".to_string()))?;
    if name.is_empty() {
        return Err(SignerError::InvalidKey("key name is empty".to_string()));
    }

    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| SignerError::InvalidKey(format!("invalid base64: {e}")))?;
    if bytes.len() != expected_len {
        return Err(SignerError::InvalidKey(format!(
            "expected {expected_len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok((name.to_string(), bytes))
}

/// A secret (private) key for signing.
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse `name:base64(seed || public)`.
    ///
    /// The embedded public half must match the seed.
    pub fn from_key_string(s: &str) -> SignerResult<(String, Self)> {
        let (name, bytes) = decode_key_string(s, 64)?;
        let (seed, public) = bytes.split_at(32);
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| SignerError::InvalidKey("invalid secret key bytes".to_string()))?;

        let inner = SigningKey::from_bytes(&seed);
        if inner.verifying_key().as_bytes() != public {
            return Err(SignerError::InvalidKey(
                "public half does not match the secret key".to_string(),
            ));
        }
        Ok((name, Self { inner }))
    }

    /// Encode as `name:base64(seed || public)`.
    pub fn to_key_string(&self, key_name: &str) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.inner.as_bytes());
        bytes.extend_from_slice(self.inner.verifying_key().as_bytes());
        format!("{key_name}:{}", STANDARD.encode(&bytes))
    }

    /// Get the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A public key for verification.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse `name:base64(public)`.
    pub fn from_key_string(s: &str) -> SignerResult<(String, Self)> {
        let (name, bytes) = decode_key_string(s, 32)?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("invalid public key bytes".to_string()))?;
        let inner = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| SignerError::InvalidKey(format!("invalid public key: {e}")))?;
        Ok((name, Self { inner }))
    }

    /// Encode as `name:base64(public)`.
    pub fn to_key_string(&self, key_name: &str) -> String {
        format!("{key_name}:{}", STANDARD.encode(self.inner.as_bytes()))
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = STANDARD.encode(self.inner.as_bytes());
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

/// A named key pair.
pub struct KeyPair {
    /// Key name, e.g. "dokhub-shares-1".
    pub name: String,
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair with the given name.
    pub fn generate(name: impl Into<String>) -> Self {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        Self {
            name: name.into(),
            secret,
            public,
        }
    }

    /// Parse a secret key string.
    pub fn from_secret_key(s: &str) -> SignerResult<Self> {
        let (name, secret) = SecretKey::from_key_string(s)?;
        let public = secret.public_key();
        Ok(Self {
            name,
            secret,
            public,
        })
    }

    pub fn secret_key_string(&self) -> String {
        self.secret.to_key_string(&self.name)
    }

    pub fn public_key_string(&self) -> String {
        self.public.to_key_string(&self.name)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("public", &self.public)
            .finish()
    }
}
