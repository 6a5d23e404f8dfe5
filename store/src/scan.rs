//! Live workspace scanning.
//!
//! "Live state" is always re-scanned into a [`Snapshot`] value at the moment
//! it is needed, never cached - the filesystem is an uncontrolled resource
//! and the snapshot log is only authoritative for *historical* state.
//!
//! Walks are gitignore-aware and skip hidden files, so VCS internals and
//! editor droppings never enter a snapshot.

use std::io;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use strata_types::{FileState, Snapshot, WorkspacePath};

use crate::error::Result;
use crate::hash::hash_file;

/// Scan `root` into a complete tree snapshot (hashes only, no blob writes).
///
/// A missing workspace directory scans as the empty tree: a conversation can
/// be bound to a directory that hasn't been created yet.
pub fn scan_workspace(root: &Path) -> Result<Snapshot> {
    let mut snapshot = Snapshot::empty();
    for (path, absolute) in walk_files(root)? {
        let hash = hash_file(&absolute)?;
        snapshot.insert(path, FileState::Present(hash));
    }
    Ok(snapshot)
}

/// Enumerate workspace files as `(relative path, absolute path)` pairs.
pub(crate) fn walk_files(root: &Path) -> Result<Vec<(WorkspacePath, PathBuf)>> {
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "Workspace directory missing; scanning as empty");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let walk = WalkBuilder::new(root)
        .hidden(true)
        .require_git(false)
        .follow_links(false)
        .build();
    for entry in walk {
        let entry = entry.map_err(|e| io::Error::other(e))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path());
        let Ok(path) = WorkspacePath::from_workspace_relative(relative) else {
            tracing::warn!(path = %relative.display(), "Skipping unrepresentable path");
            continue;
        };
        files.push((path, entry.path().to_path_buf()));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> WorkspacePath {
        WorkspacePath::parse(raw).expect("valid path")
    }

    #[test]
    fn scans_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"a").expect("write");
        std::fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/b.txt"), b"b").expect("write");

        let snapshot = scan_workspace(dir.path()).expect("scan");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.live(&path("a.txt")).is_some());
        assert!(snapshot.live(&path("sub/b.txt")).is_some());
    }

    #[test]
    fn skips_hidden_and_ignored_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("kept.txt"), b"kept").expect("write");
        std::fs::write(dir.path().join(".hidden"), b"secret").expect("write");
        std::fs::write(dir.path().join(".gitignore"), b"*.log\n").expect("write");
        std::fs::write(dir.path().join("noise.log"), b"noise").expect("write");

        let snapshot = scan_workspace(dir.path()).expect("scan");
        assert!(snapshot.live(&path("kept.txt")).is_some());
        assert_eq!(snapshot.live(&path("noise.log")), None);
        // Dotfiles (including .gitignore itself) stay out of snapshots.
        assert_eq!(snapshot.live(&path(".hidden")), None);
        assert_eq!(snapshot.live(&path(".gitignore")), None);
    }

    #[test]
    fn missing_directory_scans_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = scan_workspace(&dir.path().join("nope")).expect("scan");
        assert!(snapshot.is_empty());
    }
}
