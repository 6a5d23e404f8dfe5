//! Core domain types for strata.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.
//!
//! The one algorithm that lives here is [`diff::between`]: it operates on two
//! [`Snapshot`] value objects and never touches the filesystem, which keeps
//! change previews cheap and independent of on-disk drift.

mod change;
pub mod diff;
mod hash;
mod ids;
mod message;
mod path;
mod snapshot;

pub use change::{ChangeKind, WorkspaceFileChange};
pub use hash::{BlobHash, HASH_LEN, HashParseError};
pub use ids::{ConversationId, MessageIndex};
pub use message::{MessageRecord, Sender};
pub use path::{WorkspacePath, WorkspacePathError};
pub use snapshot::{FileState, Snapshot};
