//! Per-conversation append-only snapshot log.
//!
//! Each entry maps a message position to the complete workspace tree state
//! effective after that message was processed. Entries are appended once,
//! truncated on rollback/rewind, and never mutated in place.
//!
//! Manifests are stored content-addressed (`snapshots.manifest_hash`), so a
//! no-op entry - a message that changed nothing - shares its predecessor's
//! manifest row on disk just as it shares the `Arc<Snapshot>` in memory.
//! Every log entry holds one blob reference per live hash in its snapshot;
//! truncation and deletion release exactly those references, which is what
//! makes branch sharing safe.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{Transaction, params};

use strata_types::{ConversationId, FileState, MessageIndex, Snapshot};

use crate::VersionStore;
use crate::db::now_iso8601;
use crate::error::{Result, StoreError};
use crate::hash::{hash_bytes, hash_file};
use crate::scan::walk_files;

/// One recorded point in a conversation's workspace history.
#[derive(Debug, Clone)]
pub struct SnapshotLogEntry {
    pub message_index: MessageIndex,
    pub timestamp_ms: i64,
    pub snapshot: Arc<Snapshot>,
}

impl VersionStore {
    /// Scan the workspace, persist blobs for changed files, and append a log
    /// entry for `message_index`.
    ///
    /// Only files whose hash differs from the previous entry are written to
    /// the content store. If the tree is unchanged, the predecessor's
    /// `Arc<Snapshot>` is reused - no new snapshot object, no new blobs.
    pub fn record_snapshot(
        &self,
        conversation: &ConversationId,
        message_index: MessageIndex,
        timestamp_ms: i64,
        workspace_root: &Path,
        prev: Option<&SnapshotLogEntry>,
    ) -> Result<SnapshotLogEntry> {
        debug_assert!(
            prev.is_none_or(|p| p.message_index < message_index),
            "snapshot log appends must be monotonic"
        );

        let _gc = self.gc_shared();
        let prev_snapshot = prev.map(|entry| &entry.snapshot);

        let mut snapshot = Snapshot::empty();
        for (path, absolute) in walk_files(workspace_root)? {
            let prev_hash = prev_snapshot.and_then(|s| s.live(&path));
            let streamed = hash_file(&absolute)?;
            let hash = if prev_hash == Some(streamed) {
                streamed
            } else {
                // Re-read and store; the stored bytes win if the file changed
                // between the two passes, so the manifest can never reference
                // a blob that was not ingested.
                let bytes = std::fs::read(&absolute)?;
                self.put_inner(&bytes)?
            };
            snapshot.insert(path, FileState::Present(hash));
        }

        if let Some(prev_snapshot) = prev_snapshot {
            // Tombstone paths deleted since the previous entry.
            for (path, state) in prev_snapshot.entries() {
                if state.hash().is_some() && snapshot.state(path).is_none() {
                    snapshot.insert(path.clone(), FileState::Deleted);
                }
            }
        }

        let snapshot = match prev_snapshot {
            Some(prev_snapshot) if prev_snapshot.same_tree(&snapshot) => Arc::clone(prev_snapshot),
            _ => Arc::new(snapshot),
        };

        let manifest = serde_json::to_string(snapshot.as_ref())?;
        let manifest_hash = hash_bytes(manifest.as_bytes()).to_hex();

        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO snapshots (manifest_hash, manifest_json) VALUES (?1, ?2)",
            params![manifest_hash, manifest],
        )?;
        let snapshot_id: i64 = tx.query_row(
            "SELECT id FROM snapshots WHERE manifest_hash = ?1",
            params![manifest_hash],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO snapshot_log
                 (conversation_id, message_index, timestamp_ms, snapshot_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.as_str(),
                message_index.value() as i64,
                timestamp_ms,
                snapshot_id,
                now_iso8601()
            ],
        )?;
        for hash in snapshot.live_hashes() {
            Self::retain_with(&tx, hash)?;
        }
        tx.commit()?;

        tracing::debug!(
            conversation = %conversation,
            message_index = %message_index,
            files = snapshot.live_hashes().count(),
            "Recorded snapshot"
        );

        Ok(SnapshotLogEntry {
            message_index,
            timestamp_ms,
            snapshot,
        })
    }

    /// Load a conversation's full snapshot log, oldest first.
    ///
    /// Entries that stored the same manifest row come back sharing one
    /// `Arc<Snapshot>`.
    pub fn load_log(&self, conversation: &ConversationId) -> Result<Vec<SnapshotLogEntry>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT sl.message_index, sl.timestamp_ms, sl.snapshot_id, s.manifest_json
             FROM snapshot_log sl
             JOIN snapshots s ON s.id = sl.snapshot_id
             WHERE sl.conversation_id = ?1
             ORDER BY sl.message_index",
        )?;
        let rows = stmt.query_map(params![conversation.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut shared: std::collections::HashMap<i64, Arc<Snapshot>> =
            std::collections::HashMap::new();
        let mut entries = Vec::new();
        for row in rows {
            let (index, timestamp_ms, snapshot_id, manifest) = row?;
            let snapshot = match shared.get(&snapshot_id) {
                Some(snapshot) => Arc::clone(snapshot),
                None => {
                    let snapshot: Snapshot = serde_json::from_str(&manifest).map_err(|e| {
                        StoreError::CorruptionDetected(format!(
                            "undecodable snapshot manifest {snapshot_id}: {e}"
                        ))
                    })?;
                    let snapshot = Arc::new(snapshot);
                    shared.insert(snapshot_id, Arc::clone(&snapshot));
                    snapshot
                }
            };
            entries.push(SnapshotLogEntry {
                message_index: MessageIndex::new(index as u64),
                timestamp_ms,
                snapshot,
            });
        }
        Ok(entries)
    }

    /// Remove all log entries with `message_index > target`, releasing their
    /// blob references. Returns the number of entries removed.
    pub fn truncate_log_after(
        &self,
        conversation: &ConversationId,
        target: MessageIndex,
    ) -> Result<usize> {
        let _gc = self.gc_shared();
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let removed = {
            let mut stmt = tx.prepare(
                "SELECT s.manifest_json
                 FROM snapshot_log sl
                 JOIN snapshots s ON s.id = sl.snapshot_id
                 WHERE sl.conversation_id = ?1 AND sl.message_index > ?2",
            )?;
            let manifests: Vec<String> = stmt
                .query_map(params![conversation.as_str(), target.value() as i64], |row| {
                    row.get(0)
                })?
                .collect::<std::result::Result<_, _>>()?;
            for manifest in &manifests {
                release_manifest_refs(&tx, manifest)?;
            }
            manifests.len()
        };
        tx.execute(
            "DELETE FROM snapshot_log WHERE conversation_id = ?1 AND message_index > ?2",
            params![conversation.as_str(), target.value() as i64],
        )?;
        tx.commit()?;

        if removed > 0 {
            tracing::debug!(
                conversation = %conversation,
                after = %target,
                removed,
                "Truncated snapshot log"
            );
        }
        Ok(removed)
    }

    /// Copy the parent's log entries with `message_index <= cut` to `child`,
    /// by reference: the child rows point at the same snapshot manifests, and
    /// every live hash gains one reference so the parent's later truncation
    /// or rollback cannot invalidate blobs the child still needs.
    pub fn copy_log_prefix(
        &self,
        parent: &ConversationId,
        child: &ConversationId,
        cut: MessageIndex,
    ) -> Result<usize> {
        let _gc = self.gc_shared();
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let copied = {
            let mut stmt = tx.prepare(
                "SELECT sl.message_index, sl.timestamp_ms, sl.snapshot_id, s.manifest_json
                 FROM snapshot_log sl
                 JOIN snapshots s ON s.id = sl.snapshot_id
                 WHERE sl.conversation_id = ?1 AND sl.message_index <= ?2
                 ORDER BY sl.message_index",
            )?;
            let rows: Vec<(i64, i64, i64, String)> = stmt
                .query_map(params![parent.as_str(), cut.value() as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<std::result::Result<_, _>>()?;

            for (index, timestamp_ms, snapshot_id, manifest) in &rows {
                tx.execute(
                    "INSERT INTO snapshot_log
                         (conversation_id, message_index, timestamp_ms, snapshot_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![child.as_str(), index, timestamp_ms, snapshot_id, now_iso8601()],
                )?;
                retain_manifest_refs(&tx, manifest)?;
            }
            rows.len()
        };
        tx.commit()?;
        Ok(copied)
    }

    /// Release every blob reference held by `conversation`'s log and drop its
    /// rows. Used when a conversation is deleted.
    pub(crate) fn release_log(&self, conversation: &ConversationId) -> Result<usize> {
        // Same shape as truncation with an impossible cut point: everything
        // after "before the first message" is everything.
        let _gc = self.gc_shared();
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let removed = {
            let mut stmt = tx.prepare(
                "SELECT s.manifest_json
                 FROM snapshot_log sl
                 JOIN snapshots s ON s.id = sl.snapshot_id
                 WHERE sl.conversation_id = ?1",
            )?;
            let manifests: Vec<String> = stmt
                .query_map(params![conversation.as_str()], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            for manifest in &manifests {
                release_manifest_refs(&tx, manifest)?;
            }
            manifests.len()
        };
        tx.execute(
            "DELETE FROM snapshot_log WHERE conversation_id = ?1",
            params![conversation.as_str()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

}

/// Latest log entry with `message_index <= target`, if any.
///
/// `None` means the requested index precedes any recorded snapshot - a
/// legitimate state for early messages, answered with an empty diff rather
/// than an error.
#[must_use]
pub fn snapshot_at(log: &[SnapshotLogEntry], target: MessageIndex) -> Option<&SnapshotLogEntry> {
    log.iter()
        .rev()
        .find(|entry| entry.message_index <= target)
}

fn decode_manifest(manifest: &str) -> Result<Snapshot> {
    serde_json::from_str(manifest).map_err(|e| {
        StoreError::CorruptionDetected(format!("undecodable snapshot manifest: {e}"))
    })
}

fn retain_manifest_refs(tx: &Transaction<'_>, manifest: &str) -> Result<()> {
    for hash in decode_manifest(manifest)?.live_hashes() {
        VersionStore::retain_with(tx, hash)?;
    }
    Ok(())
}

fn release_manifest_refs(tx: &Transaction<'_>, manifest: &str) -> Result<()> {
    for hash in decode_manifest(manifest)?.live_hashes() {
        VersionStore::release_with(tx, hash)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, VersionStore, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).expect("mkdir");
        let store = VersionStore::open(&dir.path().join("state")).expect("open store");
        (dir, store, workspace)
    }

    fn conv(raw: &str) -> ConversationId {
        ConversationId::new(raw)
    }

    #[test]
    fn records_changes_and_tombstones() {
        let (_dir, store, ws) = setup();
        let id = conv("c1");

        std::fs::write(ws.join("a.txt"), b"one").expect("write");
        let first = store
            .record_snapshot(&id, MessageIndex::new(1), 100, &ws, None)
            .expect("record");
        assert_eq!(first.snapshot.live_hashes().count(), 1);

        std::fs::remove_file(ws.join("a.txt")).expect("remove");
        std::fs::write(ws.join("b.txt"), b"two").expect("write");
        let second = store
            .record_snapshot(&id, MessageIndex::new(2), 200, &ws, Some(&first))
            .expect("record");

        let a = strata_types::WorkspacePath::parse("a.txt").unwrap();
        assert_eq!(
            second.snapshot.state(&a),
            Some(FileState::Deleted),
            "deletion since the previous entry must be tombstoned"
        );
        assert!(second.snapshot.live(&strata_types::WorkspacePath::parse("b.txt").unwrap()).is_some());
    }

    #[test]
    fn noop_entry_shares_snapshot_and_blobs() {
        let (_dir, store, ws) = setup();
        let id = conv("c1");
        std::fs::write(ws.join("a.txt"), b"stable").expect("write");

        let first = store
            .record_snapshot(&id, MessageIndex::new(1), 100, &ws, None)
            .expect("record");
        let blob_count_before = count_rows(&store, "blob_refs");
        let snapshot_rows_before = count_rows(&store, "snapshots");

        let second = store
            .record_snapshot(&id, MessageIndex::new(2), 200, &ws, Some(&first))
            .expect("record");

        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(count_rows(&store, "blob_refs"), blob_count_before);
        assert_eq!(count_rows(&store, "snapshots"), snapshot_rows_before);
    }

    #[test]
    fn log_survives_reopen_with_stable_hashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = dir.path().join("ws");
        std::fs::create_dir_all(&ws).expect("mkdir");
        std::fs::write(ws.join("a.txt"), b"persist me").expect("write");
        let id = conv("c1");

        let recorded = {
            let store = VersionStore::open(&dir.path().join("state")).expect("open");
            store
                .record_snapshot(&id, MessageIndex::new(1), 100, &ws, None)
                .expect("record")
        };

        let store = VersionStore::open(&dir.path().join("state")).expect("reopen");
        let log = store.load_log(&id).expect("load");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message_index, MessageIndex::new(1));
        assert_eq!(*log[0].snapshot, *recorded.snapshot);

        let hash = log[0].snapshot.live_hashes().next().expect("one blob");
        assert_eq!(store.blob(hash).expect("blob"), b"persist me");
    }

    #[test]
    fn truncate_releases_references() {
        let (_dir, store, ws) = setup();
        let id = conv("c1");

        std::fs::write(ws.join("a.txt"), b"v1").expect("write");
        let first = store
            .record_snapshot(&id, MessageIndex::new(1), 100, &ws, None)
            .expect("record");
        std::fs::write(ws.join("a.txt"), b"v2").expect("write");
        let second = store
            .record_snapshot(&id, MessageIndex::new(2), 200, &ws, Some(&first))
            .expect("record");

        let v2_hash = second
            .snapshot
            .live(&strata_types::WorkspacePath::parse("a.txt").unwrap())
            .expect("live hash");

        let removed = store
            .truncate_log_after(&id, MessageIndex::new(1))
            .expect("truncate");
        assert_eq!(removed, 1);
        assert_eq!(store.ref_count(v2_hash).expect("count"), 0);

        store.sweep().expect("sweep");
        assert!(!store.contains_blob(v2_hash));

        // v1 is still referenced by the surviving entry.
        let v1_hash = first
            .snapshot
            .live(&strata_types::WorkspacePath::parse("a.txt").unwrap())
            .expect("live hash");
        assert!(store.contains_blob(v1_hash));
    }

    #[test]
    fn copied_prefix_keeps_blobs_alive_past_parent_truncation() {
        let (_dir, store, ws) = setup();
        let parent = conv("parent");
        let child = conv("child");

        std::fs::write(ws.join("a.txt"), b"shared history").expect("write");
        let entry = store
            .record_snapshot(&parent, MessageIndex::new(1), 100, &ws, None)
            .expect("record");
        let hash = entry.snapshot.live_hashes().next().expect("hash");

        let copied = store
            .copy_log_prefix(&parent, &child, MessageIndex::new(1))
            .expect("copy");
        assert_eq!(copied, 1);
        assert_eq!(store.ref_count(hash).expect("count"), 2);

        store
            .truncate_log_after(&parent, MessageIndex::new(0))
            .expect("truncate parent");
        store.sweep().expect("sweep");
        assert!(store.contains_blob(hash), "branch still references the blob");
    }

    #[test]
    fn snapshot_at_picks_latest_entry_at_or_before() {
        let entries = vec![
            SnapshotLogEntry {
                message_index: MessageIndex::new(1),
                timestamp_ms: 100,
                snapshot: Arc::new(Snapshot::empty()),
            },
            SnapshotLogEntry {
                message_index: MessageIndex::new(4),
                timestamp_ms: 400,
                snapshot: Arc::new(Snapshot::empty()),
            },
        ];
        assert!(snapshot_at(&entries, MessageIndex::new(0)).is_none());
        assert_eq!(
            snapshot_at(&entries, MessageIndex::new(1)).map(|e| e.message_index),
            Some(MessageIndex::new(1))
        );
        assert_eq!(
            snapshot_at(&entries, MessageIndex::new(3)).map(|e| e.message_index),
            Some(MessageIndex::new(1))
        );
        assert_eq!(
            snapshot_at(&entries, MessageIndex::new(9)).map(|e| e.message_index),
            Some(MessageIndex::new(4))
        );
    }

    fn count_rows(store: &VersionStore, table: &str) -> i64 {
        let conn = store.lock_conn();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .expect("count")
    }
}
