//! SQLite plumbing and secure-filesystem helpers.
//!
//! This module is the single authority for:
//! - Secure directory creation and Unix permission tightening
//! - Secure SQLite database file creation with permission hardening
//! - ISO 8601 timestamp formatting ("chrono-lite")
//! - The schema shared by every table in the store

use std::fs::OpenOptions;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::Connection;

pub(crate) const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        workspace TEXT,
        parent_id TEXT,
        parent_message_index INTEGER,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        conversation_id TEXT NOT NULL,
        message_index INTEGER NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        sender TEXT NOT NULL,
        content TEXT NOT NULL,
        PRIMARY KEY (conversation_id, message_index)
    );

    CREATE TABLE IF NOT EXISTS snapshots (
        id INTEGER PRIMARY KEY,
        manifest_hash TEXT NOT NULL UNIQUE,
        manifest_json TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS snapshot_log (
        conversation_id TEXT NOT NULL,
        message_index INTEGER NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
        created_at TEXT NOT NULL,
        PRIMARY KEY (conversation_id, message_index)
    );

    CREATE TABLE IF NOT EXISTS blob_refs (
        hash TEXT PRIMARY KEY,
        count INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_timestamp
    ON messages(conversation_id, timestamp_ms);
";

/// Open a SQLite database at `path` with secure directory and file permissions.
///
/// Performs the shared preamble:
/// 1. Creates the parent directory if it doesn't exist
/// 2. Tightens directory permissions (Unix: 0o700, owner-only)
/// 3. Creates the DB file with secure permissions (Unix: 0o600)
/// 4. Opens the SQLite connection and applies pragmas + schema
pub(crate) fn open_secure_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        ensure_secure_dir(parent)?;
    }
    ensure_secure_db_file(path)?;

    let db = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")
        .context("Failed to set database pragmas")?;
    db.execute_batch(SCHEMA)
        .context("Failed to create database schema")?;
    Ok(db)
}

/// Ensure a directory exists with secure permissions.
///
/// Creates the directory (and parents) if missing, then on Unix tightens
/// permissions to 0o700 if the directory is owned by the current user.
pub(crate) fn ensure_secure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read directory metadata: {}", path.display()))?;

        let our_uid = unsafe { libc::getuid() };
        if metadata.uid() != our_uid {
            return Ok(());
        }

        let current_mode = metadata.permissions().mode() & 0o777;
        if current_mode & 0o077 != 0 {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).with_context(
                || format!("Failed to set directory permissions: {}", path.display()),
            )?;
        }
    }
    Ok(())
}

/// Create the database file with 0o600 on Unix if it doesn't exist yet.
fn ensure_secure_db_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let _file = options
        .open(path)
        .with_context(|| format!("Failed to create database file: {}", path.display()))?;
    Ok(())
}

/// Current time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub(crate) fn now_iso8601() -> String {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    const SECS_PER_DAY: u64 = 86400;
    let days = secs / SECS_PER_DAY;
    let remaining = secs % SECS_PER_DAY;

    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;

    let (year, month, day) = days_to_ymd(days);
    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}Z")
}

/// Convert days since Unix epoch to (year, month, day).
///
/// Uses Howard Hinnant's civil_from_days algorithm (O(1), correct for all dates).
fn days_to_ymd(days: u64) -> (i32, u32, u32) {
    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = i64::from(yoe) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };

    (year as i32, m, d)
}
