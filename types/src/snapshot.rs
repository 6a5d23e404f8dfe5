//! Complete workspace tree state at one point in time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BlobHash, WorkspacePath};

/// File state within a snapshot: live content, or a tombstone recording
/// that the path was deleted at this snapshot.
///
/// Tombstones only appear in the snapshot where the deletion happened;
/// later snapshots simply omit the path. Diffing treats both the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<BlobHash>", into = "Option<BlobHash>")]
pub enum FileState {
    Present(BlobHash),
    Deleted,
}

impl FileState {
    /// Content hash if this entry holds live content.
    #[must_use]
    pub fn hash(self) -> Option<BlobHash> {
        match self {
            Self::Present(hash) => Some(hash),
            Self::Deleted => None,
        }
    }
}

impl From<Option<BlobHash>> for FileState {
    fn from(value: Option<BlobHash>) -> Self {
        value.map_or(Self::Deleted, Self::Present)
    }
}

impl From<FileState> for Option<BlobHash> {
    fn from(value: FileState) -> Self {
        value.hash()
    }
}

/// Complete file-path-to-blob mapping for a workspace at one moment.
///
/// A snapshot is a value object: it holds hashes and paths, never bytes,
/// and never touches the filesystem. The manifest serialization is a plain
/// JSON map (`path -> hex hash | null`), so BTreeMap ordering makes the
/// encoding canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<WorkspacePath, FileState>,
}

impl Snapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (WorkspacePath, FileState)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, path: WorkspacePath, state: FileState) {
        self.entries.insert(path, state);
    }

    #[must_use]
    pub fn state(&self, path: &WorkspacePath) -> Option<FileState> {
        self.entries.get(path).copied()
    }

    /// Content hash for `path` if it holds live content (tombstones excluded).
    #[must_use]
    pub fn live(&self, path: &WorkspacePath) -> Option<BlobHash> {
        self.state(path).and_then(FileState::hash)
    }

    pub fn paths(&self) -> impl Iterator<Item = &WorkspacePath> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&WorkspacePath, FileState)> {
        self.entries.iter().map(|(path, state)| (path, *state))
    }

    /// Hashes of live content - the blobs this snapshot keeps alive.
    pub fn live_hashes(&self) -> impl Iterator<Item = BlobHash> + '_ {
        self.entries.values().filter_map(|state| state.hash())
    }

    /// Number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tree equality: same live content, tombstones aside.
    ///
    /// This is the no-op test for snapshot recording - a fresh scan carries
    /// no tombstones, so plain `==` would spuriously differ from a
    /// predecessor that does.
    #[must_use]
    pub fn same_tree(&self, other: &Self) -> bool {
        let mut a = self
            .entries
            .iter()
            .filter_map(|(path, state)| state.hash().map(|hash| (path, hash)));
        let mut b = other
            .entries
            .iter()
            .filter_map(|(path, state)| state.hash().map(|hash| (path, hash)));
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if x == y => {}
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> BlobHash {
        BlobHash::from_bytes([byte; crate::HASH_LEN])
    }

    fn path(raw: &str) -> WorkspacePath {
        WorkspacePath::parse(raw).expect("valid path")
    }

    #[test]
    fn live_excludes_tombstones() {
        let snapshot = Snapshot::from_entries([
            (path("a.txt"), FileState::Present(hash(1))),
            (path("b.txt"), FileState::Deleted),
        ]);
        assert_eq!(snapshot.live(&path("a.txt")), Some(hash(1)));
        assert_eq!(snapshot.live(&path("b.txt")), None);
        assert_eq!(snapshot.state(&path("b.txt")), Some(FileState::Deleted));
        assert_eq!(snapshot.live_hashes().count(), 1);
    }

    #[test]
    fn same_tree_ignores_tombstones() {
        let with_tombstone = Snapshot::from_entries([
            (path("a.txt"), FileState::Present(hash(1))),
            (path("gone.txt"), FileState::Deleted),
        ]);
        let without = Snapshot::from_entries([(path("a.txt"), FileState::Present(hash(1)))]);
        assert!(with_tombstone.same_tree(&without));
        assert_ne!(with_tombstone, without);

        let changed = Snapshot::from_entries([(path("a.txt"), FileState::Present(hash(2)))]);
        assert!(!with_tombstone.same_tree(&changed));
    }

    #[test]
    fn manifest_serialization_is_a_plain_map() {
        let snapshot = Snapshot::from_entries([
            (path("a.txt"), FileState::Present(hash(1))),
            (path("b.txt"), FileState::Deleted),
        ]);
        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert_eq!(
            json,
            format!("{{\"a.txt\":\"{}\",\"b.txt\":null}}", "01".repeat(32))
        );
        let back: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, snapshot);
    }
}
