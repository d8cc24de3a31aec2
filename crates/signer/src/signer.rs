//! Share link signing and verification.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dokhub_core::ShareClaims;
use ed25519_dalek::{Signer as _, Verifier as _};

/// Signs and verifies share link claims.
///
/// Signatures are base64url without padding so they can sit in a query
/// string unescaped.
pub struct ShareSigner {
    keypair: KeyPair,
}

impl ShareSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create from a `name:base64` secret key string.
    pub fn from_secret_key(s: &str) -> SignerResult<Self> {
        Ok(Self::new(KeyPair::from_secret_key(s)?))
    }

    /// Generate a new signer with a random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    pub fn key_name(&self) -> &str {
        &self.keypair.name
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    pub fn public_key_string(&self) -> String {
        self.keypair.public_key_string()
    }

    pub fn secret_key_string(&self) -> String {
        self.keypair.secret_key_string()
    }

    /// Sign the claims' fingerprint.
    pub fn sign(&self, claims: &ShareClaims) -> String {
        let sig = self
            .keypair
            .secret
            .signing_key()
            .sign(claims.fingerprint().as_bytes());
        URL_SAFE_NO_PAD.encode(sig.to_bytes())
    }

    /// Check a signature produced by [`ShareSigner::sign`].
    pub fn verify(&self, claims: &ShareClaims, signature: &str) -> SignerResult<()> {
        verify_with(&self.keypair.public, claims, signature)
    }
}

impl std::fmt::Debug for ShareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareSigner")
            .field("key_name", &self.keypair.name)
            .finish_non_exhaustive()
    }
}

/// Verify a share signature against a public key.
pub fn verify_with(public: &PublicKey, claims: &ShareClaims, signature: &str) -> SignerResult<()> {
    let bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| SignerError::MalformedSignature(format!("invalid base64: {e}")))?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|b: Vec<u8>| {
        SignerError::MalformedSignature(format!("expected 64 bytes, got {}", b.len()))
    })?;

    public
        .verifying_key()
        .verify(
            claims.fingerprint().as_bytes(),
            &ed25519_dalek::Signature::from_bytes(&bytes),
        )
        .map_err(|_| SignerError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dokhub_core::ShareId;

    fn claims() -> ShareClaims {
        ShareClaims {
            share_id: ShareId::new(),
            storage_path: "uploads/u/1700000000000_abcd1234_rapport.pdf".to_string(),
            expires_at_unix: 1_900_000_000,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = ShareSigner::generate("dokhub-shares-1");
        let claims = claims();
        let sig = signer.sign(&claims);

        assert!(!sig.contains(['+', '/', '=']));
        signer.verify(&claims, &sig).unwrap();
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let signer = ShareSigner::generate("dokhub-shares-1");
        let original = claims();
        let sig = signer.sign(&original);

        let mut later = original.clone();
        later.expires_at_unix += 3600;
        assert!(matches!(
            signer.verify(&later, &sig),
            Err(SignerError::SignatureMismatch)
        ));

        let mut other_path = original;
        other_path.storage_path.push('x');
        assert!(signer.verify(&other_path, &sig).is_err());
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let signer = ShareSigner::generate("k");
        let claims = claims();
        assert!(signer.verify(&claims, "").is_err());
        assert!(matches!(
            signer.verify(&claims, "***"),
            Err(SignerError::MalformedSignature(_))
        ));
        assert!(signer.verify(&claims, &URL_SAFE_NO_PAD.encode([1u8; 10])).is_err());
    }

    #[test]
    fn test_other_key_rejected() {
        let a = ShareSigner::generate("a");
        let b = ShareSigner::generate("b");
        let claims = claims();
        assert!(b.verify(&claims, &a.sign(&claims)).is_err());
    }

    #[test]
    fn test_reloaded_signer_verifies() {
        let signer = ShareSigner::generate("k");
        let reloaded = ShareSigner::from_secret_key(&signer.secret_key_string()).unwrap();
        let claims = claims();
        reloaded.verify(&claims, &signer.sign(&claims)).unwrap();
        assert!(verify_with(signer.public_key(), &claims, &reloaded.sign(&claims)).is_ok());
    }
}
