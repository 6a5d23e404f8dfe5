//! Pure snapshot diffing.
//!
//! A full outer join over two snapshots' path maps. This never touches the
//! filesystem - only the two [`Snapshot`] value objects - which makes
//! previews cheap and deterministic regardless of on-disk drift.

use std::collections::BTreeSet;

use crate::{ChangeKind, Snapshot, WorkspaceFileChange};

/// Compute the file-level changes that turn `before` into `after`.
///
/// - Path live only in `after` (including tombstone-in-`before`) → `Added`
/// - Path live only in `before` (including tombstone-in-`after`) → `Deleted`
/// - Live in both with differing hashes → `Modified`
/// - Identical hashes → omitted
///
/// Results are sorted lexicographically by path for deterministic output.
/// `changed_lines` is left unset; line stats need blob bytes, which is the
/// caller's concern.
#[must_use]
pub fn between(before: &Snapshot, after: &Snapshot) -> Vec<WorkspaceFileChange> {
    let mut paths: BTreeSet<_> = before.paths().collect();
    paths.extend(after.paths());

    let mut changes = Vec::new();
    for path in paths {
        let change = match (before.live(path), after.live(path)) {
            (None, Some(hash)) => WorkspaceFileChange {
                path: path.clone(),
                kind: ChangeKind::Added,
                before: None,
                after: Some(hash),
                changed_lines: None,
            },
            (Some(hash), None) => WorkspaceFileChange {
                path: path.clone(),
                kind: ChangeKind::Deleted,
                before: Some(hash),
                after: None,
                changed_lines: None,
            },
            (Some(old), Some(new)) if old != new => WorkspaceFileChange {
                path: path.clone(),
                kind: ChangeKind::Modified,
                before: Some(old),
                after: Some(new),
                changed_lines: None,
            },
            _ => continue,
        };
        changes.push(change);
    }
    changes
}
