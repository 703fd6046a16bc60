//! Units of work executed by process-tree nodes.

use crate::error::SyncResult;
use async_trait::async_trait;
use peerfs_types::EntityPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What a process tree does to each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileAction {
    /// Upload a new entry.
    Create,
    /// Upload a new version of an existing file.
    Modify,
    /// Remove an entry from the profile and the overlay.
    Delete,
    /// Materialize a profile entry locally.
    Download,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Download => "download",
        };
        f.write_str(name)
    }
}

/// Terminal result of a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The operation changed the profile or the local tree.
    Applied,
    /// Nothing needed to change (e.g. re-uploading identical content).
    Unchanged,
}

/// One node's unit of work.
#[async_trait]
pub trait Operation: Send + Sync {
    /// The action this operation performs.
    fn action(&self) -> FileAction;

    /// The entry this operation targets.
    fn target(&self) -> &EntityPath;

    /// Runs the operation to a terminal state.
    async fn execute(&self) -> SyncResult<OperationOutcome>;
}

impl fmt::Debug for dyn Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action(), self.target())
    }
}

/// Constructs operations for local paths.
///
/// Construction fails for paths outside the storage root, without an
/// active session, or for requests that are invalid up front such as a
/// new version of a folder. Such failures never touch the network.
pub trait OperationFactory: Send + Sync {
    fn create(&self, path: &Path, action: FileAction) -> SyncResult<Arc<dyn Operation>>;
}
