//! Content-addressed blob storage with reference counting.
//!
//! Blob files live in `blobs/` under a two-character prefix directory
//! (`blobs/ab/cdef…`). A blob file's presence is authoritative for "stored";
//! the `blob_refs` table is authoritative for "reachable". The two only
//! disagree transiently, under the `gc` guard - or on corruption, which is
//! surfaced, never papered over.

use std::io;
use std::path::PathBuf;

use rusqlite::{OptionalExtension, params};

use strata_types::BlobHash;
use strata_utils::atomic_write::atomic_write_if_absent;

use crate::error::{Result, StoreError};
use crate::hash::hash_bytes;
use crate::VersionStore;

/// Outcome of a garbage-collection sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub swept_blobs: usize,
    pub freed_bytes: u64,
}

impl VersionStore {
    /// Store `bytes`, returning their content hash. Idempotent: storing the
    /// same content twice is a no-op that returns the same hash.
    pub fn put(&self, bytes: &[u8]) -> Result<BlobHash> {
        let _gc = self.gc_shared();
        self.put_inner(bytes)
    }

    pub(crate) fn put_inner(&self, bytes: &[u8]) -> Result<BlobHash> {
        let hash = hash_bytes(bytes);
        let path = self.blob_path(hash);
        if path.exists() {
            return Ok(hash);
        }

        if let Some(prefix_dir) = path.parent() {
            std::fs::create_dir_all(prefix_dir).map_err(|e| disk_error(e, prefix_dir.into()))?;
        }
        let written =
            atomic_write_if_absent(&path, bytes).map_err(|e| disk_error(e, path.clone()))?;
        if written {
            tracing::debug!(blob = %hash, bytes = bytes.len(), "Stored blob");
        }
        Ok(hash)
    }

    /// Fetch a blob's bytes.
    ///
    /// A missing file is `BlobNotFound` when nothing references the hash,
    /// but `CorruptionDetected` when the reference count says it should be
    /// live - a swept-while-referenced blob is an integrity violation, not
    /// an absence. Stored bytes are re-hashed on the way out for the same
    /// reason.
    pub fn blob(&self, hash: BlobHash) -> Result<Vec<u8>> {
        let _gc = self.gc_shared();
        let path = self.blob_path(hash);
        match std::fs::read(&path) {
            Ok(bytes) => {
                if hash_bytes(&bytes) != hash {
                    return Err(StoreError::CorruptionDetected(format!(
                        "blob {hash} content does not match its hash"
                    )));
                }
                Ok(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.ref_count(hash)? > 0 {
                    Err(StoreError::CorruptionDetected(format!(
                        "blob {hash} is referenced but missing from the store"
                    )))
                } else {
                    Err(StoreError::BlobNotFound(hash))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn contains_blob(&self, hash: BlobHash) -> bool {
        self.blob_path(hash).exists()
    }

    /// Increment a blob's reference count.
    pub fn retain(&self, hash: BlobHash) -> Result<()> {
        let _gc = self.gc_shared();
        let conn = self.lock_conn();
        Self::retain_with(&conn, hash)?;
        Ok(())
    }

    /// Decrement a blob's reference count. The blob is not removed here;
    /// removal happens lazily in [`VersionStore::sweep`].
    pub fn release(&self, hash: BlobHash) -> Result<()> {
        let _gc = self.gc_shared();
        let conn = self.lock_conn();
        Self::release_with(&conn, hash)?;
        Ok(())
    }

    /// Current reference count across all conversations and branches.
    pub fn ref_count(&self, hash: BlobHash) -> Result<i64> {
        let conn = self.lock_conn();
        let count = conn
            .query_row(
                "SELECT count FROM blob_refs WHERE hash = ?1",
                params![hash.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Mark-and-sweep garbage collection: delete every blob whose reference
    /// count has reached zero.
    ///
    /// Runs with the `gc` guard held exclusively, so no concurrent `retain`
    /// can resurrect a hash between the sweep's check and its unlink.
    pub fn sweep(&self) -> Result<SweepReport> {
        let _gc = self.gc_exclusive();
        let mut conn = self.lock_conn();

        let tx = conn.transaction()?;
        let dead: Vec<String> = {
            let mut stmt = tx.prepare("SELECT hash FROM blob_refs WHERE count <= 0")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        tx.execute("DELETE FROM blob_refs WHERE count <= 0", [])?;
        // Manifest rows are kept alive by log references the same way blobs
        // are kept alive by manifests; orphans go in the same pass.
        tx.execute(
            "DELETE FROM snapshots
             WHERE id NOT IN (SELECT DISTINCT snapshot_id FROM snapshot_log)",
            [],
        )?;
        tx.commit()?;
        drop(conn);

        let mut report = SweepReport::default();
        for hex in dead {
            let Ok(hash) = BlobHash::parse(&hex) else {
                tracing::warn!(hash = %hex, "Skipping malformed hash in blob_refs");
                continue;
            };
            let path = self.blob_path(hash);
            match std::fs::metadata(&path) {
                Ok(meta) => match std::fs::remove_file(&path) {
                    Ok(()) => {
                        report.swept_blobs += 1;
                        report.freed_bytes += meta.len();
                    }
                    // Orphaned file; put() of the same content will reuse it.
                    Err(e) => tracing::warn!(blob = %hash, "Failed to remove swept blob: {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if report.swept_blobs > 0 {
            tracing::info!(
                swept = report.swept_blobs,
                freed_bytes = report.freed_bytes,
                "Swept unreferenced blobs"
            );
        }
        Ok(report)
    }

    pub(crate) fn retain_with(conn: &rusqlite::Connection, hash: BlobHash) -> Result<()> {
        conn.execute(
            "INSERT INTO blob_refs (hash, count) VALUES (?1, 1)
             ON CONFLICT(hash) DO UPDATE SET count = count + 1",
            params![hash.to_hex()],
        )?;
        Ok(())
    }

    pub(crate) fn release_with(conn: &rusqlite::Connection, hash: BlobHash) -> Result<()> {
        conn.execute(
            "UPDATE blob_refs SET count = count - 1 WHERE hash = ?1",
            params![hash.to_hex()],
        )?;
        Ok(())
    }

    fn blob_path(&self, hash: BlobHash) -> PathBuf {
        let hex = hash.to_hex();
        self.blob_root.join(&hex[..2]).join(&hex[2..])
    }
}

fn disk_error(err: io::Error, path: PathBuf) -> StoreError {
    if matches!(
        err.kind(),
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded
    ) {
        StoreError::StorageFull { path, source: err }
    } else {
        StoreError::Io(err)
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

    #[test]
    fn put_is_idempotent() {
        let (_dir, store) = store();
        let first = store.put(b"same content").expect("put");
        let second = store.put(b"same content").expect("put again");
        assert_eq!(first, second);
        assert_eq!(store.blob(first).expect("get"), b"same content");
    }

    #[test]
    fn missing_blob_is_not_found() {
        let (_dir, store) = store();
        let hash = hash_bytes(b"never stored");
        assert!(matches!(
            store.blob(hash),
            Err(StoreError::BlobNotFound(h)) if h == hash
        ));
    }

    #[test]
    fn referenced_but_missing_blob_is_corruption() {
        let (_dir, store) = store();
        let hash = store.put(b"precious").expect("put");
        store.retain(hash).expect("retain");

        std::fs::remove_file(store.blob_path(hash)).expect("remove behind the store's back");

        assert!(matches!(
            store.blob(hash),
            Err(StoreError::CorruptionDetected(_))
        ));
    }

    #[test]
    fn tampered_blob_is_corruption() {
        let (_dir, store) = store();
        let hash = store.put(b"original").expect("put");
        std::fs::write(store.blob_path(hash), b"tampered").expect("overwrite");

        assert!(matches!(
            store.blob(hash),
            Err(StoreError::CorruptionDetected(_))
        ));
    }

    #[test]
    fn sweep_only_removes_unreferenced_blobs() {
        let (_dir, store) = store();
        let live = store.put(b"live").expect("put");
        let dead = store.put(b"dead").expect("put");
        store.retain(live).expect("retain live");
        store.retain(dead).expect("retain dead");
        store.release(dead).expect("release dead");

        let report = store.sweep().expect("sweep");
        assert_eq!(report.swept_blobs, 1);
        assert!(report.freed_bytes > 0);

        assert!(store.contains_blob(live));
        assert!(!store.contains_blob(dead));
        assert!(matches!(
            store.blob(dead),
            Err(StoreError::BlobNotFound(_))
        ));
    }

    #[test]
    fn retain_release_balance() {
        let (_dir, store) = store();
        let hash = store.put(b"counted").expect("put");
        store.retain(hash).expect("retain");
        store.retain(hash).expect("retain");
        store.release(hash).expect("release");
        assert_eq!(store.ref_count(hash).expect("count"), 1);

        // Still one reference: sweep must not touch it.
        store.sweep().expect("sweep");
        assert!(store.contains_blob(hash));
    }
}
