//! The user's profile snapshot and its optimistic-concurrency controller.
//!
//! Every device of a user shares one profile record in the overlay. All
//! mutation goes through [`ProfileVersionController::update`], which
//! reads, applies a mutation and writes back with a compare-and-swap on
//! the record version. A lost race re-reads and re-applies; nothing is
//! merged and no lock is held across the round trip.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::{backoff, round_trip};
use crate::store::{OverlayStore, ABSENT_VERSION};
use backon::Retryable;
use peerfs_types::{EntityPath, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn, Span};

/// Kind of a profile entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Folder,
}

/// One historical version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// Zero-based position in the history.
    pub index: u32,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
    /// Content size in bytes.
    pub size: u64,
}

/// Result of appending a version to a file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAppend {
    /// A new version was recorded at this index.
    Appended(u32),
    /// The fingerprint equals the latest version; history is unchanged.
    Unchanged,
}

/// A file or folder recorded in the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    kind: EntryKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    versions: Vec<FileVersion>,
}

impl ProfileEntry {
    /// A folder entry. Folders never carry versions.
    pub fn folder() -> Self {
        Self {
            kind: EntryKind::Folder,
            versions: Vec::new(),
        }
    }

    /// A file entry with its first version.
    pub fn file(fingerprint: Fingerprint, size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            versions: vec![FileVersion {
                index: 0,
                fingerprint,
                size,
            }],
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    /// Version history, oldest first.
    pub fn versions(&self) -> &[FileVersion] {
        &self.versions
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// The most recent version, `None` for folders.
    pub fn latest(&self) -> Option<&FileVersion> {
        self.versions.last()
    }

    /// Appends a version unless it repeats the latest fingerprint.
    ///
    /// Fails with [`SyncError::IllegalFolderVersion`] for folders.
    pub fn append_version(
        &mut self,
        path: &EntityPath,
        fingerprint: Fingerprint,
        size: u64,
    ) -> SyncResult<VersionAppend> {
        if self.is_folder() {
            return Err(SyncError::IllegalFolderVersion(path.clone()));
        }
        if self.latest().is_some_and(|v| v.fingerprint == fingerprint) {
            return Ok(VersionAppend::Unchanged);
        }
        let index = self.versions.len() as u32;
        self.versions.push(FileVersion {
            index,
            fingerprint,
            size,
        });
        Ok(VersionAppend::Appended(index))
    }
}

/// Whether a mutation changed the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The snapshot was modified and must be written.
    Applied,
    /// Nothing to write.
    Unchanged,
}

/// The versioned directory snapshot shared by all of a user's peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// Record version this snapshot was read or written at.
    #[serde(skip)]
    version: u64,
    entries: BTreeMap<EntityPath, ProfileEntry>,
}

impl ProfileSnapshot {
    /// An empty, never-written snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record version, 0 if never stored.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, path: &EntityPath) -> Option<&ProfileEntry> {
        self.entries.get(path)
    }

    pub fn entry_mut(&mut self, path: &EntityPath) -> SyncResult<&mut ProfileEntry> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    pub fn contains(&self, path: &EntityPath) -> bool {
        self.entries.contains_key(path)
    }

    /// All entries in pre-order.
    pub fn entries(&self) -> impl Iterator<Item = (&EntityPath, &ProfileEntry)> {
        self.entries.iter()
    }

    /// Entries strictly inside `path`, in pre-order.
    pub fn descendants<'a>(
        &'a self,
        path: &'a EntityPath,
    ) -> impl Iterator<Item = (&'a EntityPath, &'a ProfileEntry)> + 'a {
        self.entries
            .range(path.clone()..)
            .skip_while(move |(p, _)| *p == path)
            .take_while(move |(p, _)| path.is_ancestor_of(p))
    }

    /// Direct children of `path`.
    pub fn children<'a>(&'a self, path: &'a EntityPath) -> impl Iterator<Item = &'a EntityPath> + 'a {
        let depth = path.depth() + 1;
        self.descendants(path)
            .filter(move |(p, _)| p.depth() == depth)
            .map(|(p, _)| p)
    }

    /// Records a new entry. The parent must be the root or a folder entry.
    pub fn insert_entry(&mut self, path: EntityPath, entry: ProfileEntry) -> SyncResult<()> {
        if path.is_root() {
            return Err(SyncError::InvalidLocation("the storage root is implicit".into()));
        }
        if self.entries.contains_key(&path) {
            return Err(SyncError::AlreadyExists(path));
        }
        if let Some(parent) = path.parent().filter(|p| !p.is_root()) {
            match self.entries.get(&parent) {
                Some(e) if e.is_folder() => {}
                _ => return Err(SyncError::ParentMissing(path)),
            }
        }
        self.entries.insert(path, entry);
        Ok(())
    }

    /// Removes an entry. Folders must be empty.
    pub fn remove_entry(&mut self, path: &EntityPath) -> SyncResult<ProfileEntry> {
        if !self.entries.contains_key(path) {
            return Err(SyncError::NotFound(path.to_string()));
        }
        if self.descendants(path).next().is_some() {
            return Err(SyncError::DirectoryNotEmpty(path.clone()));
        }
        self.entries
            .remove(path)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    /// Whether any entry still references `fingerprint`.
    pub fn references(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .values()
            .flat_map(|e| e.versions.iter())
            .any(|v| &v.fingerprint == fingerprint)
    }

    fn encode(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8], version: u64) -> SyncResult<Self> {
        let mut snapshot: Self = serde_json::from_slice(bytes)?;
        snapshot.version = version;
        Ok(snapshot)
    }
}

/// Result of a committed (or skipped) profile update.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    /// Version of the snapshot after the update.
    pub version: u64,
    /// Whether a write happened.
    pub changed: bool,
    /// The snapshot as committed.
    pub snapshot: ProfileSnapshot,
}

/// Overlay key of a user's profile record.
pub fn profile_key(user_id: &str) -> String {
    format!("profile/{user_id}")
}

/// Optimistic-concurrency access to one user's profile record.
pub struct ProfileVersionController {
    key: String,
    store: Arc<dyn OverlayStore>,
    config: SyncConfig,
    cache: RwLock<Option<ProfileSnapshot>>,
    span: Span,
}

impl ProfileVersionController {
    /// Creates a controller for `user_id`'s profile.
    pub fn new(user_id: &str, store: Arc<dyn OverlayStore>, config: SyncConfig) -> Self {
        Self {
            key: profile_key(user_id),
            store,
            config,
            cache: RwLock::new(None),
            span: info_span!("profile", user = %user_id),
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The overlay key of the profile record.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Writes the initial empty profile. Fails with a conflict if one
    /// already exists.
    pub async fn create(&self) -> SyncResult<u64> {
        let version = self.put(&ProfileSnapshot::new(), ABSENT_VERSION).await?;
        info!(parent: &self.span, "Created profile at version {}", version);
        Ok(version)
    }

    /// Returns the current snapshot and its version.
    ///
    /// A cached copy at or above `known_version` is returned unless
    /// `force_refresh` is set. A fetched record older than the cached one
    /// is a stale replica and loses to the cache.
    pub async fn get(
        &self,
        known_version: u64,
        force_refresh: bool,
    ) -> SyncResult<(ProfileSnapshot, u64)> {
        if !force_refresh {
            if let Some(cached) = self.cache.read().await.as_ref() {
                if cached.version >= known_version {
                    return Ok((cached.clone(), cached.version));
                }
            }
        }

        let record = round_trip(&self.config, &self.span, "profile get", || {
            self.store.get(&self.key)
        })
        .await?
        .ok_or_else(|| SyncError::NotFound(self.key.clone()))?;
        let fetched = ProfileSnapshot::decode(&record.value, record.version)?;

        let mut cache = self.cache.write().await;
        let snapshot = match cache.take() {
            Some(cached) if cached.version > fetched.version => {
                debug!(
                    parent: &self.span,
                    "Ignoring stale profile version {} (cached {})",
                    fetched.version,
                    cached.version
                );
                cached
            }
            _ => fetched,
        };
        *cache = Some(snapshot.clone());
        let version = snapshot.version;
        Ok((snapshot, version))
    }

    /// Writes `snapshot` only if the stored version still equals
    /// `expected_version`. Returns the new version.
    pub async fn put(&self, snapshot: &ProfileSnapshot, expected_version: u64) -> SyncResult<u64> {
        let bytes = snapshot.encode()?;
        let result = round_trip(&self.config, &self.span, "profile put", || {
            self.store.put(&self.key, bytes.clone(), expected_version)
        })
        .await;

        match result {
            Ok(version) => {
                let mut committed = snapshot.clone();
                committed.version = version;
                *self.cache.write().await = Some(committed);
                debug!(parent: &self.span, "Profile committed at version {}", version);
                Ok(version)
            }
            Err(e) => {
                if e.is_conflict() {
                    debug!(parent: &self.span, "Profile put lost the race: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Applies `mutation` to the latest snapshot and commits it, re-reading
    /// and re-applying after every conflict up to `conflict_retries` times.
    ///
    /// A mutation returning [`Change::Unchanged`] ends the update without a
    /// write, once it has been confirmed against a freshly fetched snapshot.
    /// Mutation errors are returned as-is and never retried.
    pub async fn update<F>(&self, mutation: F) -> SyncResult<ProfileUpdate>
    where
        F: Fn(&mut ProfileSnapshot) -> SyncResult<Change> + Send + Sync,
    {
        let mutation = &mutation;
        let mut attempt = 0usize;
        let result = (|| {
            attempt += 1;
            self.try_update(mutation, attempt > 1)
        })
        .retry(backoff(&self.config, self.config.conflict_retries))
        .sleep(tokio::time::sleep)
        .when(SyncError::is_conflict)
        .notify(|e: &SyncError, delay: Duration| {
            debug!(parent: &self.span, "Retrying profile update in {:?}: {}", delay, e);
        })
        .await;

        if let Err(e) = &result {
            if e.is_conflict() {
                warn!(
                    parent: &self.span,
                    "Profile update gave up after {} conflicts",
                    self.config.conflict_retries + 1
                );
            }
        }
        result
    }

    async fn try_update<F>(&self, mutation: &F, refresh: bool) -> SyncResult<ProfileUpdate>
    where
        F: Fn(&mut ProfileSnapshot) -> SyncResult<Change> + Send + Sync,
    {
        let (mut snapshot, mut version) = self.get(0, refresh).await?;
        let mut change = mutation(&mut snapshot)?;
        if change == Change::Unchanged && !refresh {
            // A cached no-op may hide a newer stored version.
            debug!(parent: &self.span, "Confirming no-op against the stored profile");
            (snapshot, version) = self.get(0, true).await?;
            change = mutation(&mut snapshot)?;
        }
        match change {
            Change::Unchanged => Ok(ProfileUpdate {
                version,
                changed: false,
                snapshot,
            }),
            Change::Applied => {
                let new_version = self.put(&snapshot, version).await?;
                snapshot.version = new_version;
                Ok(ProfileUpdate {
                    version: new_version,
                    changed: true,
                    snapshot,
                })
            }
        }
    }

    /// Drops the cached snapshot if it is older than `version`.
    pub async fn invalidate_below(&self, version: u64) {
        let mut cache = self.cache.write().await;
        if cache.as_ref().is_some_and(|c| c.version < version) {
            debug!(parent: &self.span, "Invalidating cached profile below version {}", version);
            *cache = None;
        }
    }

    /// Drops the cached snapshot.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Version of the cached snapshot, if any.
    pub async fn cached_version(&self) -> Option<u64> {
        self.cache.read().await.as_ref().map(|c| c.version)
    }
}
