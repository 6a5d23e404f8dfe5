use thiserror::Error;

use strata_store::StoreError;
use strata_types::{ConversationId, MessageIndex, WorkspacePath};

/// One file operation that still failed after the per-file retry.
#[derive(Debug)]
pub struct FileOpFailure {
    pub path: WorkspacePath,
    pub error: StoreError,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    #[error("conversation {conversation} has no message at index {index}")]
    UnknownMessage {
        conversation: ConversationId,
        index: MessageIndex,
    },

    /// Expected, non-fatal: the conversation has no bound workspace
    /// directory. Rollback and rewind catch this internally and fall back to
    /// truncating messages only.
    #[error("conversation {0} has no workspace bound")]
    NoSnapshotBound(ConversationId),

    #[error("snapshot for message {index} in conversation {conversation} would be out of order")]
    SnapshotOutOfOrder {
        conversation: ConversationId,
        index: MessageIndex,
    },

    #[error("no message at or before timestamp {at_timestamp_ms} in conversation {conversation}")]
    BranchPointNotFound {
        conversation: ConversationId,
        at_timestamp_ms: i64,
    },

    /// Some file operations failed after retrying. The live workspace is
    /// partially restored, but the snapshot log and message list are left in
    /// their pre-rollback state so the caller can re-attempt or reconcile.
    #[error(
        "rollback applied {applied} of {total} file changes; history left untruncated"
    )]
    RollbackIncomplete {
        applied: usize,
        total: usize,
        failures: Vec<FileOpFailure>,
    },

    /// The apply step was cancelled before any file write started. Once a
    /// write has begun, cancellation is no longer honored.
    #[error("rollback cancelled before any file changes were applied")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
