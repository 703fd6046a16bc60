//! Error types for the sync core.

use peerfs_types::EntityPath;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Construction errors (`InvalidLocation`, `NoActiveSession`,
/// `IllegalFolderVersion`) are contained to one tree node. `Conflict` and
/// `Timeout` are retried before they reach a node.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The path lies outside the configured storage root.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// No identity/session has been established.
    #[error("no active session")]
    NoActiveSession,

    /// An optimistic write lost the race.
    #[error("version conflict: expected version {expected}, stored version is {current}")]
    Conflict { expected: u64, current: u64 },

    /// A signed message failed verification.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    /// The tree builder could not construct a node for a path.
    #[error("operation skipped for {path}: {reason}")]
    OperationSkipped {
        path: String,
        reason: Box<SyncError>,
    },

    /// A new version was requested for a folder.
    #[error("folders have no versions: {0}")]
    IllegalFolderVersion(EntityPath),

    /// A store or peer round trip exceeded its bounded wait.
    #[error("operation timed out")]
    Timeout,

    /// An ancestor in the process tree failed, so this node never ran.
    #[error("not started: ancestor {0} failed")]
    Cascade(String),

    /// The entry does not exist in the profile or the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entry already exists in the profile.
    #[error("already exists: {0}")]
    AlreadyExists(EntityPath),

    /// The parent folder of an entry is not in the profile.
    #[error("parent folder missing for {0}")]
    ParentMissing(EntityPath),

    /// A folder still has children in the profile.
    #[error("folder not empty: {0}")]
    DirectoryNotEmpty(EntityPath),

    /// Downloaded content does not match its recorded fingerprint.
    #[error("content mismatch for {0}")]
    ContentMismatch(EntityPath),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local filesystem error.
    #[error("io error: {0}")]
    Io(String),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Protocol error (unexpected message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer not found.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// An operation task panicked or was aborted.
    #[error("operation task failed: {0}")]
    TaskFailed(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Whether a round trip exceeded its bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Whether the error is an optimistic-write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<peerfs_crypto::CryptoError> for SyncError {
    fn from(e: peerfs_crypto::CryptoError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<peerfs_types::Error> for SyncError {
    fn from(e: peerfs_types::Error) -> Self {
        match e {
            peerfs_types::Error::InvalidPath(path) => Self::InvalidLocation(path),
            other => Self::Serialization(other.to_string()),
        }
    }
}
