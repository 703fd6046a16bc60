use super::OperationContext;
use crate::error::{SyncError, SyncResult};
use crate::operation::{FileAction, Operation, OperationOutcome};
use crate::profile::{Change, FileVersion};
use async_trait::async_trait;
use peerfs_types::EntityPath;
use std::path::Path;
use tracing::{info, warn};

/// Removes an entry from the profile, then drops content no other entry
/// references. Folders must already be empty, which the reversed delete
/// tree guarantees.
pub struct DeleteEntry {
    ctx: OperationContext,
    target: EntityPath,
}

impl DeleteEntry {
    pub fn new(ctx: OperationContext, local: &Path) -> SyncResult<Self> {
        let target = ctx.session.entity_path(local)?;
        Ok(Self { ctx, target })
    }
}

#[async_trait]
impl Operation for DeleteEntry {
    fn action(&self) -> FileAction {
        FileAction::Delete
    }

    fn target(&self) -> &EntityPath {
        &self.target
    }

    async fn execute(&self) -> SyncResult<OperationOutcome> {
        let profile = self.ctx.session.profile();
        let (before, _) = profile.get(0, true).await?;
        let versions = before
            .entry(&self.target)
            .map(|e| e.versions().to_vec())
            .ok_or_else(|| SyncError::NotFound(self.target.to_string()))?;

        let update = profile
            .update(|snapshot| {
                snapshot.remove_entry(&self.target)?;
                Ok(Change::Applied)
            })
            .await?;

        if !versions.is_empty() {
            self.remove_unreferenced(&versions).await;
        }

        info!(
            parent: &self.ctx.span,
            "Deleted {} at profile version {}", self.target, update.version
        );
        Ok(OperationOutcome::Applied)
    }
}

impl DeleteEntry {
    /// Drops content records nothing references any more. References are
    /// checked against a freshly fetched profile so that an entry committed
    /// elsewhere since this delete keeps its content.
    async fn remove_unreferenced(&self, versions: &[FileVersion]) {
        let latest = match self.ctx.session.profile().get(0, true).await {
            Ok((snapshot, _)) => snapshot,
            Err(e) => {
                warn!(
                    parent: &self.ctx.span,
                    "Leaving content of {} in place, profile unavailable: {}", self.target, e
                );
                return;
            }
        };
        for version in versions {
            if latest.references(&version.fingerprint) {
                continue;
            }
            if let Err(e) = self.ctx.remove_content(&version.fingerprint).await {
                warn!(
                    parent: &self.ctx.span,
                    "Failed to remove content {} of {}: {}", version.fingerprint, self.target, e
                );
            }
        }
    }
}
