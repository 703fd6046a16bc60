use super::OperationContext;
use crate::error::{SyncError, SyncResult};
use crate::operation::{FileAction, Operation, OperationOutcome};
use crate::profile::{Change, VersionAppend};
use async_trait::async_trait;
use peerfs_types::EntityPath;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Uploads a new version of an existing file.
///
/// Folders have no versions: constructing this for a directory fails
/// with [`SyncError::IllegalFolderVersion`] before any network access.
/// Content identical to the latest stored version is a no-op.
pub struct ModifyEntry {
    ctx: OperationContext,
    local: PathBuf,
    target: EntityPath,
}

impl ModifyEntry {
    pub fn new(ctx: OperationContext, local: &Path) -> SyncResult<Self> {
        let target = ctx.session.entity_path(local)?;
        if ctx.fs.is_dir(local) {
            return Err(SyncError::IllegalFolderVersion(target));
        }
        Ok(Self {
            ctx,
            local: local.to_path_buf(),
            target,
        })
    }
}

#[async_trait]
impl Operation for ModifyEntry {
    fn action(&self) -> FileAction {
        FileAction::Modify
    }

    fn target(&self) -> &EntityPath {
        &self.target
    }

    async fn execute(&self) -> SyncResult<OperationOutcome> {
        let data = self.ctx.fs.read(&self.local)?;
        let fingerprint = self.ctx.crypto.hash(&data);
        let size = data.len() as u64;
        let profile = self.ctx.session.profile();

        let (snapshot, _) = profile.get(0, true).await?;
        let entry = snapshot
            .entry(&self.target)
            .ok_or_else(|| SyncError::NotFound(self.target.to_string()))?;
        if entry.is_folder() {
            return Err(SyncError::IllegalFolderVersion(self.target.clone()));
        }
        if entry.latest().is_some_and(|v| v.fingerprint == fingerprint) {
            debug!(parent: &self.ctx.span, "{} unchanged, skipping upload", self.target);
            return Ok(OperationOutcome::Unchanged);
        }

        self.ctx.store_content(&fingerprint, &data).await?;

        let update = profile
            .update(|snapshot| {
                match snapshot
                    .entry_mut(&self.target)?
                    .append_version(&self.target, fingerprint, size)?
                {
                    VersionAppend::Appended(_) => Ok(Change::Applied),
                    VersionAppend::Unchanged => Ok(Change::Unchanged),
                }
            })
            .await?;

        if !update.changed {
            return Ok(OperationOutcome::Unchanged);
        }
        self.ctx.ensure_content(&fingerprint, &data).await?;
        info!(
            parent: &self.ctx.span,
            "Uploaded new version of {} at profile version {}", self.target, update.version
        );
        Ok(OperationOutcome::Applied)
    }
}
