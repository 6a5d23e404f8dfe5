use std::io;
use std::path::PathBuf;

use thiserror::Error;

use strata_types::BlobHash;

/// Errors surfaced by the persistence layer.
///
/// The controller's retry policy keys off [`StoreError::is_transient`]:
/// plain IO and database errors may be retried; integrity violations and
/// storage exhaustion abort the whole operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage full while writing {path}")]
    StorageFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io failure")]
    Io(#[from] io::Error),

    #[error("database error")]
    Database(#[from] rusqlite::Error),

    #[error("manifest encoding failed")]
    Manifest(#[from] serde_json::Error),

    #[error("blob {0} not found")]
    BlobNotFound(BlobHash),

    /// An invariant the store is supposed to uphold was observed broken -
    /// e.g. a blob file missing while its reference count is positive, or
    /// stored bytes that no longer match their hash. Never silently
    /// substituted with empty content.
    #[error("corruption detected: {0}")]
    CorruptionDetected(String),
}

impl StoreError {
    /// Whether a retry of the same operation could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
