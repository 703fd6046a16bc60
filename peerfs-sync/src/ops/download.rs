use super::OperationContext;
use crate::error::{SyncError, SyncResult};
use crate::operation::{FileAction, Operation, OperationOutcome};
use async_trait::async_trait;
use peerfs_types::EntityPath;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Materializes a profile entry under the local storage root.
pub struct DownloadEntry {
    ctx: OperationContext,
    local: PathBuf,
    target: EntityPath,
}

impl DownloadEntry {
    pub fn new(ctx: OperationContext, local: &Path) -> SyncResult<Self> {
        let target = ctx.session.entity_path(local)?;
        Ok(Self {
            ctx,
            local: local.to_path_buf(),
            target,
        })
    }
}

#[async_trait]
impl Operation for DownloadEntry {
    fn action(&self) -> FileAction {
        FileAction::Download
    }

    fn target(&self) -> &EntityPath {
        &self.target
    }

    async fn execute(&self) -> SyncResult<OperationOutcome> {
        let (snapshot, _) = self.ctx.session.profile().get(0, false).await?;
        let entry = snapshot
            .entry(&self.target)
            .ok_or_else(|| SyncError::NotFound(self.target.to_string()))?;

        let Some(latest) = entry.latest() else {
            self.ctx.fs.create_dir(&self.local)?;
            return Ok(OperationOutcome::Applied);
        };

        if self.ctx.fs.exists(&self.local) {
            let local = self.ctx.fs.read(&self.local)?;
            if self.ctx.crypto.hash(&local) == latest.fingerprint {
                debug!(parent: &self.ctx.span, "{} already up to date", self.target);
                return Ok(OperationOutcome::Unchanged);
            }
        }

        let data = self.ctx.load_content(&latest.fingerprint).await?;
        if self.ctx.crypto.hash(&data) != latest.fingerprint {
            return Err(SyncError::ContentMismatch(self.target.clone()));
        }
        self.ctx.fs.write(&self.local, &data)?;
        debug!(parent: &self.ctx.span, "Downloaded {} ({} bytes)", self.target, data.len());
        Ok(OperationOutcome::Applied)
    }
}
