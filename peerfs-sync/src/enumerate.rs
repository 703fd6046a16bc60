//! Change-set enumeration.
//!
//! Produces the deterministic pre-order listing the tree builder consumes:
//! every entry precedes its descendants and siblings appear in name order.
//! The listing is the same whatever the action; reversing it for deletion
//! is the builder's job.

use crate::error::SyncResult;
use crate::fs::LocalFileSystem;
use crate::profile::ProfileSnapshot;
use peerfs_types::EntityPath;
use std::path::{Path, PathBuf};

/// Enumerates local directories and remote snapshots.
pub struct ChangeSetEnumerator;

impl ChangeSetEnumerator {
    /// Pre-order listing of `start` and everything below it.
    pub fn local(fs: &dyn LocalFileSystem, start: &Path) -> SyncResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut stack = vec![start.to_path_buf()];
        while let Some(path) = stack.pop() {
            let children = fs.list_children(&path)?;
            out.push(path);
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// Pre-order listing of the snapshot entries at or below `under`.
    /// Passing the root lists the whole snapshot.
    pub fn from_snapshot(snapshot: &ProfileSnapshot, under: &EntityPath) -> Vec<EntityPath> {
        let mut out = Vec::new();
        if !under.is_root() && snapshot.contains(under) {
            out.push(under.clone());
        }
        out.extend(snapshot.descendants(under).map(|(path, _)| path.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileEntry;
    use peerfs_types::Fingerprint;

    fn p(s: &str) -> EntityPath {
        EntityPath::parse(s).unwrap()
    }

    fn snapshot() -> ProfileSnapshot {
        let mut s = ProfileSnapshot::new();
        let fp = Fingerprint::from_bytes([1; 32]);
        s.insert_entry(p("a"), ProfileEntry::folder()).unwrap();
        s.insert_entry(p("a/b"), ProfileEntry::folder()).unwrap();
        s.insert_entry(p("a/b/c"), ProfileEntry::file(fp, 1)).unwrap();
        s.insert_entry(p("a-z"), ProfileEntry::file(fp, 1)).unwrap();
        s
    }

    #[test]
    fn snapshot_whole_tree_is_preorder() {
        let listed = ChangeSetEnumerator::from_snapshot(&snapshot(), &EntityPath::root());
        assert_eq!(listed, vec![p("a"), p("a/b"), p("a/b/c"), p("a-z")]);
    }

    #[test]
    fn snapshot_subtree_includes_start() {
        let listed = ChangeSetEnumerator::from_snapshot(&snapshot(), &p("a/b"));
        assert_eq!(listed, vec![p("a/b"), p("a/b/c")]);
    }

    #[test]
    fn snapshot_unknown_subtree_is_empty() {
        assert!(ChangeSetEnumerator::from_snapshot(&snapshot(), &p("zzz")).is_empty());
    }
}
