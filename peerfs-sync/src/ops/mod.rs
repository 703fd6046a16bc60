//! File operations against the overlay and the user's profile.
//!
//! File content is stored content-addressed under `content/<fingerprint>`;
//! the profile only records fingerprints.

mod create;
mod delete;
mod download;
mod modify;

pub use create::CreateEntry;
pub use delete::DeleteEntry;
pub use download::DownloadEntry;
pub use modify::ModifyEntry;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::fs::LocalFileSystem;
use crate::operation::{FileAction, Operation, OperationFactory};
use crate::retry::round_trip;
use crate::session::{Session, SessionHandle};
use crate::store::{OverlayStore, ABSENT_VERSION};
use peerfs_crypto::CryptoProvider;
use peerfs_types::Fingerprint;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn, Span};

/// Overlay key of a content record.
pub fn content_key(fingerprint: &Fingerprint) -> String {
    format!("content/{}", fingerprint.to_hex())
}

/// Everything an operation needs to run.
#[derive(Clone)]
pub struct OperationContext {
    pub session: Arc<Session>,
    pub store: Arc<dyn OverlayStore>,
    pub fs: Arc<dyn LocalFileSystem>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub config: SyncConfig,
    pub span: Span,
}

impl OperationContext {
    /// Stores content under its fingerprint. Content already present is
    /// left alone.
    pub(crate) async fn store_content(&self, fingerprint: &Fingerprint, data: &[u8]) -> SyncResult<()> {
        let key = content_key(fingerprint);
        let result = round_trip(&self.config, &self.span, "content put", || {
            self.store.put(&key, data.to_vec(), ABSENT_VERSION)
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(SyncError::Conflict { .. }) => {
                debug!(parent: &self.span, "Content {} already stored", fingerprint);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stores content again if it went missing after [`store_content`],
    /// which happens when a delete elsewhere dropped the last reference
    /// before this entry's profile commit landed.
    ///
    /// [`store_content`]: Self::store_content
    pub(crate) async fn ensure_content(&self, fingerprint: &Fingerprint, data: &[u8]) -> SyncResult<()> {
        let key = content_key(fingerprint);
        let present = round_trip(&self.config, &self.span, "content get", || self.store.get(&key))
            .await?
            .is_some();
        if !present {
            warn!(parent: &self.span, "Content {} vanished before commit, storing again", fingerprint);
            self.store_content(fingerprint, data).await?;
        }
        Ok(())
    }

    /// Fetches a content record.
    pub(crate) async fn load_content(&self, fingerprint: &Fingerprint) -> SyncResult<Vec<u8>> {
        let key = content_key(fingerprint);
        let record = round_trip(&self.config, &self.span, "content get", || self.store.get(&key))
            .await?
            .ok_or(SyncError::NotFound(key))?;
        Ok(record.value)
    }

    /// Removes a content record; an already-missing record is fine.
    pub(crate) async fn remove_content(&self, fingerprint: &Fingerprint) -> SyncResult<()> {
        let key = content_key(fingerprint);
        match round_trip(&self.config, &self.span, "content remove", || self.store.remove(&key)).await {
            Ok(()) | Err(SyncError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Builds the operations for each [`FileAction`] from the active session.
pub struct FileOperationFactory {
    sessions: SessionHandle,
    store: Arc<dyn OverlayStore>,
    fs: Arc<dyn LocalFileSystem>,
    crypto: Arc<dyn CryptoProvider>,
    config: SyncConfig,
    span: Span,
}

impl FileOperationFactory {
    pub fn new(
        sessions: SessionHandle,
        store: Arc<dyn OverlayStore>,
        fs: Arc<dyn LocalFileSystem>,
        crypto: Arc<dyn CryptoProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            sessions,
            store,
            fs,
            crypto,
            config,
            span: Span::current(),
        }
    }

    /// Replaces the logging span handed to every operation.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn context(&self) -> SyncResult<OperationContext> {
        Ok(OperationContext {
            session: self.sessions.current()?,
            store: self.store.clone(),
            fs: self.fs.clone(),
            crypto: self.crypto.clone(),
            config: self.config.clone(),
            span: self.span.clone(),
        })
    }
}

impl OperationFactory for FileOperationFactory {
    fn create(&self, path: &Path, action: FileAction) -> SyncResult<Arc<dyn Operation>> {
        let ctx = self.context()?;
        Ok(match action {
            FileAction::Create => Arc::new(CreateEntry::new(ctx, path)?),
            FileAction::Modify => Arc::new(ModifyEntry::new(ctx, path)?),
            FileAction::Delete => Arc::new(DeleteEntry::new(ctx, path)?),
            FileAction::Download => Arc::new(DownloadEntry::new(ctx, path)?),
        })
    }
}
