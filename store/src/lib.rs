//! Persistence layer for strata.
//!
//! One `VersionStore` owns all durable state:
//!
//! ```text
//! <state>/
//!   strata.db        conversations, messages, snapshot_log, snapshots, blob_refs
//!   blobs/ab/cdef…   content-addressed blob files (SHA-256, two-level fan-out)
//! ```
//!
//! Blob bytes are owned exclusively by the content store; snapshot-log rows
//! and conversation records only ever hold hashes and paths. Rollback and
//! branching are therefore pointer rewrites until the moment a rollback is
//! applied.
//!
//! # Locking
//!
//! Two store-wide locks, always acquired in this order:
//! - `gc`: an `RwLock` generation guard. Every operation that inserts or
//!   reads blob files, or adjusts reference counts, holds it shared; the
//!   sweep holds it exclusively so a blob can never be retained and swept
//!   concurrently (the check-then-act the design requires).
//! - `conn`: the SQLite connection mutex. Multi-row mutations run as one
//!   transaction under it.
//!
//! Per-conversation serialization (record vs. truncate) is the engine's
//! responsibility; the store only guarantees that each mutation is atomic.

mod blobs;
mod conversations;
mod db;
mod error;
mod hash;
mod log;
mod scan;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::Connection;

pub use blobs::SweepReport;
pub use conversations::ConversationRow;
pub use error::{Result, StoreError};
pub use hash::{hash_bytes, hash_file};
pub use log::{SnapshotLogEntry, snapshot_at};
pub use scan::scan_workspace;

/// Durable store for blobs, snapshots, and conversation records.
pub struct VersionStore {
    conn: Mutex<Connection>,
    blob_root: PathBuf,
    /// Generation guard for garbage collection; see the module docs.
    gc: RwLock<()>,
}

impl VersionStore {
    /// Open (or create) the store under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let blob_root = state_dir.join("blobs");
        db::ensure_secure_dir(&blob_root).map_err(open_error)?;

        let conn = db::open_secure_db(&state_dir.join("strata.db")).map_err(open_error)?;
        tracing::debug!(state_dir = %state_dir.display(), "Opened version store");

        Ok(Self {
            conn: Mutex::new(conn),
            blob_root,
            gc: RwLock::new(()),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn gc_shared(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.gc
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn gc_exclusive(&self) -> std::sync::RwLockWriteGuard<'_, ()> {
        self.gc
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn open_error(err: anyhow::Error) -> StoreError {
    match err.downcast::<rusqlite::Error>() {
        Ok(db_err) => StoreError::Database(db_err),
        Err(err) => StoreError::Io(std::io::Error::other(format!("{err:#}"))),
    }
}
