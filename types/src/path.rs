use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A normalized path relative to the workspace root.
///
/// Invariants: forward-slash separated, no empty, `.`, or `..` components,
/// never absolute. Parsing happens at the boundary; everything past it can
/// rely on the invariant - in particular, a `WorkspacePath` joined onto a
/// workspace root can never escape it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspacePath(String);

#[derive(Debug, Error)]
pub enum WorkspacePathError {
    #[error("workspace path must not be empty")]
    Empty,
    #[error("workspace path must be relative: {0:?}")]
    Absolute(String),
    #[error("workspace path {path:?} has invalid component {component:?}")]
    InvalidComponent { path: String, component: String },
    #[error("workspace path is not valid UTF-8: {0:?}")]
    NotUtf8(PathBuf),
}

impl WorkspacePath {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, WorkspacePathError> {
        let normalized = raw.as_ref().replace('\\', "/");
        if normalized.is_empty() {
            return Err(WorkspacePathError::Empty);
        }
        if normalized.starts_with('/') || normalized.contains(':') {
            return Err(WorkspacePathError::Absolute(normalized));
        }
        for component in normalized.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(WorkspacePathError::InvalidComponent {
                    component: component.to_string(),
                    path: normalized,
                });
            }
        }
        Ok(Self(normalized))
    }

    /// Convert a path already known to be relative to the workspace root
    /// (e.g. produced by `strip_prefix` during a directory walk).
    pub fn from_workspace_relative(path: &Path) -> Result<Self, WorkspacePathError> {
        let raw = path
            .to_str()
            .ok_or_else(|| WorkspacePathError::NotUtf8(path.to_path_buf()))?;
        Self::parse(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve to an absolute path under `root` using native separators.
    #[must_use]
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for component in self.0.split('/') {
            out.push(component);
        }
        out
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkspacePath {
    type Error = WorkspacePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspacePath> for String {
    fn from(value: WorkspacePath) -> Self {
        value.0
    }
}
