//! Atomic file write helpers.
//!
//! Uses a temp file + rename pattern. On Windows, rename-over-existing fails, so we
//! use a backup-and-restore fallback to avoid data loss when overwriting.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `bytes`.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let mut tmp = NamedTempFile::new_in(parent_of(path))?;
    tmp.write_all(bytes)?;

    // Persist (rename) - handle Windows where rename fails if target exists.
    if let Err(err) = tmp.persist(path) {
        if path.exists() {
            // Windows fallback: backup and restore.
            let backup_path = path.with_extension("bak");
            let _ = fs::remove_file(&backup_path);
            fs::rename(path, &backup_path)?;

            if let Err(rename_err) = err.file.persist(path) {
                let _ = fs::rename(&backup_path, path);
                return Err(rename_err.error);
            }
            if let Err(e) = fs::remove_file(&backup_path) {
                tracing::warn!(
                    path = %backup_path.display(),
                    "Failed to remove .bak after atomic write: {e}"
                );
            }
        } else {
            return Err(err.error);
        }
    }

    Ok(())
}

/// Atomically create `path` with `bytes` unless it already exists.
///
/// The temp file is fsynced before the rename - callers use this for
/// content-addressed files, where a blob that vanishes on power loss while
/// its hash is referenced would be corruption. Returns `Ok(false)` when the
/// destination was already present, which for content-addressed files means
/// identical bytes.
pub fn atomic_write_if_absent(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(false);
    }

    let mut tmp = NamedTempFile::new_in(parent_of(path))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        // Lost the race to a concurrent writer of the same content.
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error),
    }
}

fn parent_of(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{atomic_write, atomic_write_if_absent};

    #[test]
    fn atomic_write_overwrites_existing_and_cleans_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"one").expect("write one");
        atomic_write(&path, b"two").expect("write two");

        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content, "two");
        assert!(!path.with_extension("bak").exists());
    }

    #[test]
    fn if_absent_skips_existing_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");

        assert!(atomic_write_if_absent(&path, b"payload").expect("first write"));
        assert!(!atomic_write_if_absent(&path, b"payload").expect("second write"));
        assert_eq!(fs::read(&path).expect("read"), b"payload");
    }
}
