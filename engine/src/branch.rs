//! Branch creation: copy-on-write forks of a conversation's history.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use strata_store::ConversationRow;
use strata_types::ConversationId;

use crate::error::{EngineError, Result};
use crate::{ConversationState, Engine, read_state};

impl Engine {
    /// Fork `parent` at the last message with `timestamp_ms <= at_timestamp_ms`.
    ///
    /// The branch point is addressed by timestamp, not index: the parent
    /// keeps growing, so indices are not branch-stable identifiers. The new
    /// conversation shares the parent's workspace binding and copies the
    /// message list and snapshot log up to and including the cut - log
    /// entries by reference, with every referenced blob retained so the
    /// parent's later truncation or rollback cannot invalidate them. No blob
    /// bytes are copied.
    ///
    /// The parent's lock is held (shared) only for the duration of the copy,
    /// not for the branch's lifetime.
    pub fn create_branch(
        &self,
        parent: &ConversationId,
        at_timestamp_ms: i64,
    ) -> Result<ConversationId> {
        let parent_state = self.state(parent)?;
        let guard = read_state(&parent_state);

        let cut = guard
            .messages
            .iter()
            .rev()
            .find(|m| m.timestamp_ms <= at_timestamp_ms)
            .map(|m| m.index)
            .ok_or_else(|| EngineError::BranchPointNotFound {
                conversation: parent.clone(),
                at_timestamp_ms,
            })?;

        let child_id = ConversationId::new(Uuid::new_v4().to_string());
        let row = ConversationRow {
            id: child_id.clone(),
            workspace: guard.row.workspace.clone(),
            parent: Some((parent.clone(), cut)),
        };

        self.store().insert_conversation(&row)?;
        let copy = self
            .store()
            .copy_messages_prefix(parent, &child_id, cut)
            .and_then(|_| self.store().copy_log_prefix(parent, &child_id, cut));
        if let Err(err) = copy {
            // Leave no half-built branch behind.
            if let Err(cleanup) = self.store().delete_conversation(&child_id) {
                tracing::warn!(conversation = %child_id, "Failed to clean up aborted branch: {cleanup}");
            }
            return Err(err.into());
        }

        let messages: Vec<_> = guard
            .messages
            .iter()
            .filter(|m| m.index <= cut)
            .cloned()
            .collect();
        let log: Vec<_> = guard
            .log
            .iter()
            .filter(|entry| entry.message_index <= cut)
            .cloned()
            .collect();
        drop(guard);

        let state = ConversationState { row, messages, log };
        self.lock_map()
            .insert(child_id.clone(), Arc::new(RwLock::new(state)));

        tracing::info!(
            parent = %parent,
            branch = %child_id,
            cut = %cut,
            "Created branch"
        );
        Ok(child_id)
    }
}
