//! The crypto-provider contract used by the sync core.
//!
//! The core only signs, verifies and fingerprints; it never encrypts
//! transport traffic through this trait.

use crate::error::CryptoResult;
use crate::signing::{KeyPair, Signature, SigningKey, VerifyingKey};
use peerfs_types::Fingerprint;
use sha2::{Digest, Sha256};

/// Signing, verification, hashing and key generation.
pub trait CryptoProvider: Send + Sync {
    /// Generates a fresh asymmetric key pair.
    fn generate_keypair(&self) -> KeyPair;

    /// Signs `message` with `key`.
    fn sign(&self, message: &[u8], key: &SigningKey) -> Signature;

    /// Checks raw `signature` bytes over `message`.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not match,
    /// and an error when the signature bytes are malformed.
    fn verify(&self, message: &[u8], signature: &[u8], key: &VerifyingKey) -> CryptoResult<bool>;

    /// Fingerprints content.
    fn hash(&self, data: &[u8]) -> Fingerprint;
}

/// Ed25519 signatures with SHA-256 fingerprints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Provider;

impl CryptoProvider for Ed25519Provider {
    fn generate_keypair(&self) -> KeyPair {
        KeyPair::generate()
    }

    fn sign(&self, message: &[u8], key: &SigningKey) -> Signature {
        key.sign(message)
    }

    fn verify(&self, message: &[u8], signature: &[u8], key: &VerifyingKey) -> CryptoResult<bool> {
        let signature = Signature::from_slice(signature)?;
        Ok(key.verify(message, &signature))
    }

    fn hash(&self, data: &[u8]) -> Fingerprint {
        let digest = Sha256::digest(data);
        Fingerprint::from_bytes(digest.into())
    }
}
