//! The sync engine facade.
//!
//! Ties the pieces together for one device: the active session, the
//! overlay, local filesystem access, and tree building and execution for
//! each requested action.

use crate::config::SyncConfig;
use crate::enumerate::ChangeSetEnumerator;
use crate::error::{SyncError, SyncResult};
use crate::executor::{TreeListener, TreeReport};
use crate::fs::{LocalFileSystem, StdFileSystem};
use crate::handler::SessionMessageHandler;
use crate::messages::MessageBody;
use crate::messenger::Messenger;
use crate::operation::FileAction;
use crate::ops::FileOperationFactory;
use crate::profile::ProfileVersionController;
use crate::session::{Session, SessionHandle};
use crate::store::OverlayStore;
use crate::transport::PeerTransport;
use crate::tree::{ProcessTree, ProcessTreeBuilder};
use peerfs_crypto::{CryptoProvider, Ed25519Provider, KeyPair};
use peerfs_types::{EntityPath, PeerId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

/// One device's sync engine.
pub struct SyncEngine {
    peer_id: PeerId,
    config: SyncConfig,
    store: Arc<dyn OverlayStore>,
    fs: Arc<dyn LocalFileSystem>,
    crypto: Arc<dyn CryptoProvider>,
    sessions: SessionHandle,
    span: Span,
}

impl SyncEngine {
    /// Creates an engine over `store` using the local disk and Ed25519.
    pub fn new(peer_id: PeerId, config: SyncConfig, store: Arc<dyn OverlayStore>) -> Self {
        let span = info_span!("sync", peer = %peer_id, device = %config.device_name);
        Self {
            peer_id,
            config,
            store,
            fs: Arc::new(StdFileSystem),
            crypto: Arc::new(Ed25519Provider),
            sessions: SessionHandle::new(),
            span,
        }
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn LocalFileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    /// Shared handle to the active session.
    pub fn sessions(&self) -> SessionHandle {
        self.sessions.clone()
    }

    // ── Session ──────────────────────────────────────────────────

    /// Establishes the session trees are built under. Replaces any
    /// previous session.
    pub fn login(
        &self,
        user_id: &str,
        keys: KeyPair,
        storage_root: impl Into<PathBuf>,
    ) -> Arc<Session> {
        let profile = ProfileVersionController::new(user_id, self.store.clone(), self.config.clone())
            .with_span(info_span!(parent: &self.span, "profile", user = %user_id));
        let session = Arc::new(Session::new(user_id, keys, storage_root, Arc::new(profile)));
        self.sessions.set(session.clone());
        info!(
            parent: &self.span,
            "Logged in as {} at {}",
            user_id,
            session.storage_root().display()
        );
        session
    }

    pub fn logout(&self) {
        if self.sessions.is_active() {
            info!(parent: &self.span, "Logged out");
        }
        self.sessions.clear();
    }

    pub fn session(&self) -> SyncResult<Arc<Session>> {
        self.sessions.current()
    }

    /// Writes the initial empty profile for the session's user.
    pub async fn register(&self) -> SyncResult<u64> {
        self.session()?.profile().create().await
    }

    // ── Trees ────────────────────────────────────────────────────

    /// A builder whose operations run under the current session.
    pub fn tree_builder(&self, action: FileAction) -> ProcessTreeBuilder {
        let span = info_span!(parent: &self.span, "tree", %action);
        let factory = FileOperationFactory::new(
            self.sessions.clone(),
            self.store.clone(),
            self.fs.clone(),
            self.crypto.clone(),
            self.config.clone(),
        )
        .with_span(span.clone());
        ProcessTreeBuilder::new(Arc::new(factory)).with_span(span)
    }

    pub fn build_tree(&self, paths: &[PathBuf], action: FileAction) -> ProcessTree {
        self.tree_builder(action).build(paths, action)
    }

    /// Executes a tree on the configured worker pool.
    pub async fn run_tree(&self, tree: &mut ProcessTree, listener: &dyn TreeListener) -> TreeReport {
        tree.execute(self.config.worker_pool_size, listener).await
    }

    /// Pre-order listing of local paths at or below `start`, excluding the
    /// storage root itself.
    pub fn change_set(&self, start: &Path) -> SyncResult<Vec<PathBuf>> {
        let session = self.session()?;
        let mut paths = ChangeSetEnumerator::local(self.fs.as_ref(), start)?;
        paths.retain(|p| p != session.storage_root());
        Ok(paths)
    }

    /// Pre-order listing of profile entries at or below `start`, as local
    /// paths.
    pub async fn remote_change_set(&self, start: &Path) -> SyncResult<Vec<PathBuf>> {
        let session = self.session()?;
        let under = if start == session.storage_root() {
            EntityPath::root()
        } else {
            session.entity_path(start)?
        };
        let (snapshot, _) = session.profile().get(0, true).await?;
        Ok(ChangeSetEnumerator::from_snapshot(&snapshot, &under)
            .iter()
            .map(|p| session.local_path(p))
            .collect())
    }

    /// Enumerates, builds and runs one tree for `action` on `start`.
    ///
    /// Create and Modify walk the local directory; Delete and Download
    /// walk the stored profile.
    pub async fn sync_path(
        &self,
        start: &Path,
        action: FileAction,
        listener: &dyn TreeListener,
    ) -> SyncResult<TreeReport> {
        let paths = match action {
            FileAction::Create | FileAction::Modify => self.change_set(start)?,
            FileAction::Delete | FileAction::Download => self.remote_change_set(start).await?,
        };
        let mut tree = self.build_tree(&paths, action);
        Ok(self.run_tree(&mut tree, listener).await)
    }

    /// Materializes the whole profile under the storage root.
    pub async fn download_all(&self, listener: &dyn TreeListener) -> SyncResult<TreeReport> {
        let root = self.session()?.storage_root().to_path_buf();
        self.sync_path(&root, FileAction::Download, listener).await
    }

    // ── Messaging ────────────────────────────────────────────────

    /// Starts a messenger on `transport`, signing with the session's keys
    /// and answering with a [`SessionMessageHandler`].
    pub fn connect(&self, transport: Arc<dyn PeerTransport>) -> SyncResult<Messenger> {
        let session = self.session()?;
        if transport.local_peer_id() != self.peer_id {
            return Err(SyncError::Protocol(format!(
                "transport belongs to {}, not {}",
                transport.local_peer_id(),
                self.peer_id
            )));
        }
        let span = info_span!(parent: &self.span, "messenger");
        let messenger = Messenger::new(
            transport,
            self.crypto.clone(),
            session.keys().clone(),
            self.config.clone(),
        )
        .with_span(span.clone());
        let handler = SessionMessageHandler::new(self.sessions.clone()).with_span(span);
        messenger.start(Arc::new(handler))?;
        Ok(messenger)
    }

    /// Tells every known peer that the profile reached `version`. Returns
    /// how many peers were reached.
    pub async fn announce_profile(&self, messenger: &Messenger, version: u64) -> SyncResult<usize> {
        let session = self.session()?;
        let mut reached = 0;
        for peer in messenger.peers() {
            let body = MessageBody::ProfileChanged {
                user_id: session.user_id().to_string(),
                version,
            };
            match messenger.send(peer, body).await {
                Ok(_) => reached += 1,
                Err(e) => warn!(parent: &self.span, "Could not notify {}: {}", peer, e),
            }
        }
        Ok(reached)
    }
}
