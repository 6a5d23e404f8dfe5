use serde::{Deserialize, Serialize};

use crate::MessageIndex;

/// Who produced a message. Carried for lineage display; the versioning core
/// does not restrict which messages can be rollback targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One message in a conversation's monotonic list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub index: MessageIndex,
    /// Wall-clock timestamp in epoch milliseconds, assigned by the caller.
    /// Timestamps are the branch-stable way to address a message.
    pub timestamp_ms: i64,
    pub sender: Sender,
    pub content: String,
}
