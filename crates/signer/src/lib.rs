//! Share link signing for dokhub.
//!
//! This crate provides:
//! - Ed25519 key generation and the `name:base64` key string format
//! - Signing and verification of share link claims

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, SecretKey};
pub use signer::ShareSigner;
