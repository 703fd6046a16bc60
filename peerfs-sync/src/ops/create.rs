use super::OperationContext;
use crate::error::SyncResult;
use crate::operation::{FileAction, Operation, OperationOutcome};
use crate::profile::{Change, EntryKind, ProfileEntry};
use async_trait::async_trait;
use peerfs_types::EntityPath;
use std::path::{Path, PathBuf};
use tracing::info;

/// Uploads a new file or folder and records it in the profile.
pub struct CreateEntry {
    ctx: OperationContext,
    local: PathBuf,
    target: EntityPath,
    kind: EntryKind,
}

impl CreateEntry {
    pub fn new(ctx: OperationContext, local: &Path) -> SyncResult<Self> {
        let target = ctx.session.entity_path(local)?;
        let kind = if ctx.fs.is_dir(local) {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        Ok(Self {
            ctx,
            local: local.to_path_buf(),
            target,
            kind,
        })
    }
}

#[async_trait]
impl Operation for CreateEntry {
    fn action(&self) -> FileAction {
        FileAction::Create
    }

    fn target(&self) -> &EntityPath {
        &self.target
    }

    async fn execute(&self) -> SyncResult<OperationOutcome> {
        let (entry, content) = match self.kind {
            EntryKind::Folder => (ProfileEntry::folder(), None),
            EntryKind::File => {
                let data = self.ctx.fs.read(&self.local)?;
                let fingerprint = self.ctx.crypto.hash(&data);
                self.ctx.store_content(&fingerprint, &data).await?;
                let entry = ProfileEntry::file(fingerprint, data.len() as u64);
                (entry, Some((fingerprint, data)))
            }
        };

        let update = self
            .ctx
            .session
            .profile()
            .update(|snapshot| {
                snapshot.insert_entry(self.target.clone(), entry.clone())?;
                Ok(Change::Applied)
            })
            .await?;
        if let Some((fingerprint, data)) = content {
            self.ctx.ensure_content(&fingerprint, &data).await?;
        }

        info!(
            parent: &self.ctx.span,
            "Created {} at profile version {}", self.target, update.version
        );
        Ok(OperationOutcome::Applied)
    }
}
