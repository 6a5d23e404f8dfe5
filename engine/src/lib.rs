//! Rollback, rewind, and branch orchestration for strata.
//!
//! The [`Engine`] ties the persistence layer to conversation state:
//!
//! ```text
//! Engine
//! ├── store: VersionStore (blobs, snapshot log, conversation rows)
//! └── conversations: per-conversation RwLock'd state
//!     ├── messages: Vec<MessageRecord>   (monotonic, truncated on rollback)
//!     └── log: Vec<SnapshotLogEntry>     (aligned by message index)
//! ```
//!
//! # Concurrency
//!
//! Single writer per conversation: every mutating operation - message
//! append, snapshot recording, truncation, rollback/rewind application, the
//! branch-source copy - runs under that conversation's exclusive lock.
//! Previews take the shared lock, so they see a consistent log and can never
//! observe a torn append. The content store is shared and multi-writer;
//! its own locking is described in `strata-store`.
//!
//! # External collaborators
//!
//! The chat/UI layer drives the engine through the operations on
//! [`Engine`]; message processing itself (what happens after a rewind
//! resumes a conversation) is outside this crate.

mod branch;
mod cancel;
mod controller;
mod conversations;
mod error;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

pub use cancel::CancelFlag;
pub use controller::RollbackReport;
pub use error::{EngineError, FileOpFailure, Result};
pub use strata_store::{ConversationRow, SnapshotLogEntry, SweepReport};
pub use strata_types::{
    ChangeKind, ConversationId, MessageIndex, MessageRecord, Sender, WorkspaceFileChange,
};

use strata_store::VersionStore;

pub(crate) struct ConversationState {
    pub(crate) row: ConversationRow,
    pub(crate) messages: Vec<MessageRecord>,
    pub(crate) log: Vec<SnapshotLogEntry>,
}

/// Conversation-linked workspace versioning engine.
pub struct Engine {
    store: VersionStore,
    conversations: Mutex<HashMap<ConversationId, Arc<RwLock<ConversationState>>>>,
}

impl Engine {
    /// Open the engine over the durable state under `state_dir`, loading
    /// every recorded conversation.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let store = VersionStore::open(state_dir)?;

        let mut conversations = HashMap::new();
        for row in store.load_conversations()? {
            let messages = store.load_messages(&row.id)?;
            let log = store.load_log(&row.id)?;
            conversations.insert(
                row.id.clone(),
                Arc::new(RwLock::new(ConversationState { row, messages, log })),
            );
        }
        tracing::debug!(conversations = conversations.len(), "Engine opened");

        Ok(Self {
            store,
            conversations: Mutex::new(conversations),
        })
    }

    /// Run a garbage-collection sweep over the shared content store.
    pub fn sweep(&self) -> Result<SweepReport> {
        Ok(self.store.sweep()?)
    }

    pub(crate) fn state(&self, id: &ConversationId) -> Result<Arc<RwLock<ConversationState>>> {
        let map = self.lock_map();
        map.get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConversation(id.clone()))
    }

    pub(crate) fn lock_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ConversationId, Arc<RwLock<ConversationState>>>> {
        self.conversations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn store(&self) -> &VersionStore {
        &self.store
    }
}

pub(crate) fn read_state(
    state: &RwLock<ConversationState>,
) -> std::sync::RwLockReadGuard<'_, ConversationState> {
    state
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn write_state(
    state: &RwLock<ConversationState>,
) -> std::sync::RwLockWriteGuard<'_, ConversationState> {
    state
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
