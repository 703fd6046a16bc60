//! Core type definitions for peerfs.
//!
//! This crate defines the fundamental types shared by every peerfs crate:
//! - Peer and message identifiers (UUID v7)
//! - Structured entity paths, the join key between a local file tree and the
//!   user's profile snapshot
//! - Content fingerprints
//!
//! Networking, crypto and profile logic live in their own crates.

mod fingerprint;
mod ids;
mod path;

pub use fingerprint::{Fingerprint, FINGERPRINT_SIZE};
pub use ids::{MessageId, PeerId};
pub use path::EntityPath;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}
