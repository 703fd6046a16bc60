//! Error types for signing and verification.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The public key bytes do not encode a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature bytes have the wrong length.
    #[error("malformed signature: expected {expected} bytes, got {actual}")]
    MalformedSignature { expected: usize, actual: usize },

    /// Hex decoding failed.
    #[error("invalid encoding: {0}")]
    Encoding(#[from] hex::FromHexError),
}
