use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BlobHash, WorkspacePath};

/// What happened to a path between two snapshots, read in the direction of
/// the comparison: `Added` means the path exists only on the "after" side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// One file-level change between two snapshots - the unit shown to the user
/// before any destructive action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFileChange {
    pub path: WorkspacePath,
    pub kind: ChangeKind,
    /// Content hash on the "before" side, absent for `Added`.
    pub before: Option<BlobHash>,
    /// Content hash on the "after" side, absent for `Deleted`.
    pub after: Option<BlobHash>,
    /// Line-level change estimate when both sides are text; `None` when not
    /// computed (pure diffs) or not computable (binary content).
    pub changed_lines: Option<u32>,
}

impl WorkspaceFileChange {
    /// Flip the direction of this change (before/after swapped).
    #[must_use]
    pub fn inverted(self) -> Self {
        let kind = match self.kind {
            ChangeKind::Added => ChangeKind::Deleted,
            ChangeKind::Deleted => ChangeKind::Added,
            ChangeKind::Modified => ChangeKind::Modified,
        };
        Self {
            path: self.path,
            kind,
            before: self.after,
            after: self.before,
            changed_lines: self.changed_lines,
        }
    }
}
