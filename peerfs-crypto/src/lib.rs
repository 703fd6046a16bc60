//! Signing and fingerprinting for peerfs.
//!
//! The sync core never encrypts transport traffic itself; it only needs
//! to sign messages, verify them, and fingerprint content. This crate
//! provides:
//! - Ed25519 key pairs, signatures and their byte encodings
//! - The [`CryptoProvider`] contract the core is written against
//! - [`Ed25519Provider`], the default provider (Ed25519 + SHA-256)

mod error;
mod provider;
mod signing;

pub use error::{CryptoError, CryptoResult};
pub use provider::{CryptoProvider, Ed25519Provider};
pub use signing::{
    KeyPair, Signature, SigningKey, VerifyingKey, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE,
    SIGNATURE_SIZE,
};
