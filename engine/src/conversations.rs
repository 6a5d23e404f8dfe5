//! Conversation registry: creation, message append, snapshot recording.

use std::path::Path;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use strata_store::ConversationRow;
use strata_types::{ConversationId, MessageIndex, MessageRecord, Sender};

use crate::error::{EngineError, Result};
use crate::{ConversationState, Engine, SnapshotLogEntry, read_state, write_state};

impl Engine {
    /// Create a conversation, optionally bound to a workspace directory.
    pub fn create_conversation(&self, workspace: Option<&Path>) -> Result<ConversationId> {
        let id = ConversationId::new(Uuid::new_v4().to_string());
        let row = ConversationRow {
            id: id.clone(),
            workspace: workspace.map(Path::to_path_buf),
            parent: None,
        };
        self.store().insert_conversation(&row)?;

        let state = ConversationState {
            row,
            messages: Vec::new(),
            log: Vec::new(),
        };
        self.lock_map()
            .insert(id.clone(), Arc::new(RwLock::new(state)));

        tracing::info!(conversation = %id, bound = workspace.is_some(), "Created conversation");
        Ok(id)
    }

    /// Append a message, assigning the next monotonic index (starting at 1).
    pub fn append_message(
        &self,
        id: &ConversationId,
        sender: Sender,
        content: &str,
        timestamp_ms: i64,
    ) -> Result<MessageIndex> {
        let state = self.state(id)?;
        let mut guard = write_state(&state);

        let index = guard
            .messages
            .last()
            .map_or(MessageIndex::new(1), |last| last.index.next());
        let message = MessageRecord {
            index,
            timestamp_ms,
            sender,
            content: content.to_string(),
        };
        self.store().insert_message(id, &message)?;
        guard.messages.push(message);
        Ok(index)
    }

    /// Record the workspace state effective after `message_index` finished
    /// processing.
    ///
    /// Unbound conversations skip this silently - there is nothing to
    /// snapshot and that is not an error. Messages that changed nothing end
    /// up as no-op entries sharing their predecessor's snapshot.
    pub fn record_snapshot(&self, id: &ConversationId, message_index: MessageIndex) -> Result<()> {
        let state = self.state(id)?;
        let mut guard = write_state(&state);

        let Some(workspace) = guard.row.workspace.clone() else {
            return Ok(());
        };
        let timestamp_ms = guard
            .messages
            .iter()
            .find(|m| m.index == message_index)
            .map(|m| m.timestamp_ms)
            .ok_or_else(|| EngineError::UnknownMessage {
                conversation: id.clone(),
                index: message_index,
            })?;
        if guard
            .log
            .last()
            .is_some_and(|last| last.message_index >= message_index)
        {
            return Err(EngineError::SnapshotOutOfOrder {
                conversation: id.clone(),
                index: message_index,
            });
        }

        let prev = guard.log.last();
        let entry =
            self.store()
                .record_snapshot(id, message_index, timestamp_ms, &workspace, prev)?;
        guard.log.push(entry);
        Ok(())
    }

    /// The conversation's snapshot log, oldest first.
    pub fn snapshot_log(&self, id: &ConversationId) -> Result<Vec<SnapshotLogEntry>> {
        let state = self.state(id)?;
        let guard = read_state(&state);
        Ok(guard.log.clone())
    }

    /// The conversation's message list, oldest first.
    pub fn messages(&self, id: &ConversationId) -> Result<Vec<MessageRecord>> {
        let state = self.state(id)?;
        let guard = read_state(&state);
        Ok(guard.messages.clone())
    }

    /// Conversation metadata (workspace binding, branch lineage).
    pub fn conversation(&self, id: &ConversationId) -> Result<ConversationRow> {
        let state = self.state(id)?;
        let guard = read_state(&state);
        Ok(guard.row.clone())
    }

    /// All known conversation ids.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationId> {
        self.lock_map().keys().cloned().collect()
    }

    /// Delete a conversation and release every blob reference its log held.
    ///
    /// Branches of this conversation are untouched: lineage is a weak
    /// back-reference, and their copied log entries carry their own
    /// references.
    pub fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        let state = self.state(id)?;
        {
            // Exclusive access so no mutation is mid-flight when rows vanish.
            let _guard = write_state(&state);
            self.store().delete_conversation(id)?;
        }
        self.lock_map().remove(id);
        Ok(())
    }
}
