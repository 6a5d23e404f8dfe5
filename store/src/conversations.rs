//! Conversation and message records.
//!
//! The engine keeps the authoritative in-memory state per conversation;
//! these rows are its durable mirror, written through on every mutation.

use std::path::PathBuf;

use rusqlite::{OptionalExtension, params};

use strata_types::{ConversationId, MessageIndex, MessageRecord, Sender};

use crate::VersionStore;
use crate::db::now_iso8601;
use crate::error::{Result, StoreError};

/// Durable conversation metadata.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: ConversationId,
    /// Bound workspace directory; `None` for chat-only conversations.
    pub workspace: Option<PathBuf>,
    /// Immutable lineage back-reference for branches. Display only - never
    /// ownership, never cascaded deletion.
    pub parent: Option<(ConversationId, MessageIndex)>,
}

impl VersionStore {
    pub fn insert_conversation(&self, row: &ConversationRow) -> Result<()> {
        let conn = self.lock_conn();
        let workspace = row
            .workspace
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());
        let (parent_id, parent_index) = match &row.parent {
            Some((id, index)) => (Some(id.as_str().to_string()), Some(index.value() as i64)),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO conversations (id, workspace, parent_id, parent_message_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id.as_str(),
                workspace,
                parent_id,
                parent_index,
                now_iso8601()
            ],
        )?;
        Ok(())
    }

    pub fn load_conversations(&self) -> Result<Vec<ConversationRow>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, workspace, parent_id, parent_message_index FROM conversations
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, workspace, parent_id, parent_index) = row?;
            let parent = match (parent_id, parent_index) {
                (Some(id), Some(index)) => {
                    Some((ConversationId::new(id), MessageIndex::new(index as u64)))
                }
                _ => None,
            };
            out.push(ConversationRow {
                id: ConversationId::new(id),
                workspace: workspace.map(PathBuf::from),
                parent,
            });
        }
        Ok(out)
    }

    /// Remove a conversation, its messages, and its snapshot log, releasing
    /// every blob reference the log held. Blobs shared with branches survive
    /// through the branches' own references.
    pub fn delete_conversation(&self, conversation: &ConversationId) -> Result<()> {
        let released = self.release_log(conversation)?;
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation.as_str()],
        )?;
        conn.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation.as_str()],
        )?;
        tracing::info!(conversation = %conversation, released, "Deleted conversation");
        Ok(())
    }

    pub fn insert_message(
        &self,
        conversation: &ConversationId,
        message: &MessageRecord,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO messages (conversation_id, message_index, timestamp_ms, sender, content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.as_str(),
                message.index.value() as i64,
                message.timestamp_ms,
                sender_label(message.sender),
                message.content
            ],
        )?;
        Ok(())
    }

    pub fn update_message_content(
        &self,
        conversation: &ConversationId,
        index: MessageIndex,
        content: &str,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE messages SET content = ?3
             WHERE conversation_id = ?1 AND message_index = ?2",
            params![conversation.as_str(), index.value() as i64, content],
        )?;
        Ok(())
    }

    /// Delete messages with `message_index > target`. Returns how many rows
    /// were removed.
    pub fn delete_messages_after(
        &self,
        conversation: &ConversationId,
        target: MessageIndex,
    ) -> Result<usize> {
        let conn = self.lock_conn();
        let removed = conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1 AND message_index > ?2",
            params![conversation.as_str(), target.value() as i64],
        )?;
        Ok(removed)
    }

    /// Copy the parent's messages with `message_index <= cut` to `child`.
    pub fn copy_messages_prefix(
        &self,
        parent: &ConversationId,
        child: &ConversationId,
        cut: MessageIndex,
    ) -> Result<usize> {
        let conn = self.lock_conn();
        let copied = conn.execute(
            "INSERT INTO messages (conversation_id, message_index, timestamp_ms, sender, content)
             SELECT ?2, message_index, timestamp_ms, sender, content
             FROM messages WHERE conversation_id = ?1 AND message_index <= ?3",
            params![parent.as_str(), child.as_str(), cut.value() as i64],
        )?;
        Ok(copied)
    }

    pub fn load_messages(&self, conversation: &ConversationId) -> Result<Vec<MessageRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT message_index, timestamp_ms, sender, content FROM messages
             WHERE conversation_id = ?1 ORDER BY message_index",
        )?;
        let rows = stmt.query_map(params![conversation.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (index, timestamp_ms, sender, content) = row?;
            out.push(MessageRecord {
                index: MessageIndex::new(index as u64),
                timestamp_ms,
                sender: parse_sender(&sender)?,
                content,
            });
        }
        Ok(out)
    }

    /// Whether a conversation row exists (used for load-time sanity checks).
    pub fn conversation_exists(&self, conversation: &ConversationId) -> Result<bool> {
        let conn = self.lock_conn();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM conversations WHERE id = ?1",
                params![conversation.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn sender_label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "user",
        Sender::Assistant => "assistant",
    }
}

fn parse_sender(raw: &str) -> Result<Sender> {
    match raw {
        "user" => Ok(Sender::User),
        "assistant" => Ok(Sender::Assistant),
        other => Err(StoreError::CorruptionDetected(format!(
            "unknown sender {other:?} in messages table"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, VersionStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = VersionStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    fn message(index: u64, timestamp_ms: i64, content: &str) -> MessageRecord {
        MessageRecord {
            index: MessageIndex::new(index),
            timestamp_ms,
            sender: Sender::User,
            content: content.to_string(),
        }
    }

    #[test]
    fn conversation_round_trip() {
        let (_dir, store) = store();
        let row = ConversationRow {
            id: ConversationId::new("c1"),
            workspace: Some(PathBuf::from("/tmp/ws")),
            parent: None,
        };
        store.insert_conversation(&row).expect("insert");

        let loaded = store.load_conversations().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, row.id);
        assert_eq!(loaded[0].workspace, row.workspace);
        assert!(loaded[0].parent.is_none());
    }

    #[test]
    fn message_truncation_and_edit() {
        let (_dir, store) = store();
        let id = ConversationId::new("c1");
        for i in 1..=4 {
            store
                .insert_message(&id, &message(i, i as i64 * 100, &format!("m{i}")))
                .expect("insert");
        }

        let removed = store
            .delete_messages_after(&id, MessageIndex::new(2))
            .expect("truncate");
        assert_eq!(removed, 2);

        store
            .update_message_content(&id, MessageIndex::new(2), "edited")
            .expect("edit");

        let messages = store.load_messages(&id).expect("load");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "edited");
    }

    #[test]
    fn branch_lineage_round_trips() {
        let (_dir, store) = store();
        let parent = ConversationRow {
            id: ConversationId::new("parent"),
            workspace: None,
            parent: None,
        };
        store.insert_conversation(&parent).expect("insert parent");

        let child = ConversationRow {
            id: ConversationId::new("child"),
            workspace: None,
            parent: Some((parent.id.clone(), MessageIndex::new(3))),
        };
        store.insert_conversation(&child).expect("insert child");

        let loaded = store.load_conversations().expect("load");
        let child_row = loaded.iter().find(|r| r.id == child.id).expect("child");
        assert_eq!(
            child_row.parent,
            Some((parent.id.clone(), MessageIndex::new(3)))
        );
    }
}
