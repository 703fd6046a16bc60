//! Local filesystem access.
//!
//! Assumed synchronous and reliable. Children are always listed in name
//! order so that enumerating an unchanged tree is reproducible.

use crate::error::SyncResult;
use std::path::{Path, PathBuf};

/// The local file tree a session is bound to.
pub trait LocalFileSystem: Send + Sync {
    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Direct children of a directory, sorted by name. Files have none.
    fn list_children(&self, path: &Path) -> SyncResult<Vec<PathBuf>>;

    /// Reads a file's bytes.
    fn read(&self, path: &Path) -> SyncResult<Vec<u8>>;

    /// Writes a file, replacing any existing content.
    fn write(&self, path: &Path, data: &[u8]) -> SyncResult<()>;

    /// Creates a directory and any missing parents.
    fn create_dir(&self, path: &Path) -> SyncResult<()>;
}

/// [`LocalFileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl LocalFileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_children(&self, path: &Path) -> SyncResult<Vec<PathBuf>> {
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut children = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort();
        Ok(children)
    }

    fn read(&self, path: &Path) -> SyncResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn write(&self, path: &Path, data: &[u8]) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(path, data)?)
    }

    fn create_dir(&self, path: &Path) -> SyncResult<()> {
        Ok(std::fs::create_dir_all(path)?)
    }
}
