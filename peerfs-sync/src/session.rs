//! Sessions: the identity and storage root a device syncs under.

use crate::error::{SyncError, SyncResult};
use crate::profile::ProfileVersionController;
use peerfs_crypto::KeyPair;
use peerfs_types::EntityPath;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// An established identity bound to a local storage root.
pub struct Session {
    user_id: String,
    keys: KeyPair,
    storage_root: PathBuf,
    profile: Arc<ProfileVersionController>,
}

impl Session {
    /// Creates a session.
    pub fn new(
        user_id: impl Into<String>,
        keys: KeyPair,
        storage_root: impl Into<PathBuf>,
        profile: Arc<ProfileVersionController>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            keys,
            storage_root: storage_root.into(),
            profile,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The session's signing identity.
    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// The profile controller for this user.
    pub fn profile(&self) -> &Arc<ProfileVersionController> {
        &self.profile
    }

    /// Maps a local path to its entity path.
    ///
    /// Fails with [`SyncError::InvalidLocation`] for paths outside the
    /// storage root or for the root itself.
    pub fn entity_path(&self, local: &Path) -> SyncResult<EntityPath> {
        let relative = local.strip_prefix(&self.storage_root).map_err(|_| {
            SyncError::InvalidLocation(format!(
                "{} is outside {}",
                local.display(),
                self.storage_root.display()
            ))
        })?;
        let path = EntityPath::from_relative(relative)
            .map_err(|e| SyncError::InvalidLocation(e.to_string()))?;
        if path.is_root() {
            return Err(SyncError::InvalidLocation(format!(
                "{} is the storage root",
                local.display()
            )));
        }
        Ok(path)
    }

    /// Maps an entity path to its local path.
    pub fn local_path(&self, path: &EntityPath) -> PathBuf {
        path.to_local(&self.storage_root)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("storage_root", &self.storage_root)
            .finish_non_exhaustive()
    }
}

/// The slot holding the current session, shared with operation factories.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<RwLock<Option<Arc<Session>>>>);

impl SessionHandle {
    /// Creates an empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// The active session, or [`SyncError::NoActiveSession`].
    pub fn current(&self) -> SyncResult<Arc<Session>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::NoActiveSession)
    }

    /// Installs a session, replacing any previous one.
    pub fn set(&self, session: Arc<Session>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Ends the current session.
    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_active(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
