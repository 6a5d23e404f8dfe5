//! Rollback/rewind controller.
//!
//! Each invocation is an independent operation: preview computes the diff
//! between the live on-disk tree (rescanned at call time, never cached) and
//! the state as of the target message; apply writes the target state back
//! file by file, and only after every file operation succeeds does it commit
//! the destructive step - truncating the snapshot log and the message list.
//!
//! Writes are content-addressed and order-independent, so each file is
//! retried once on transient IO failure. Any remaining failure aborts with
//! the log untruncated and is reported as partial application; integrity
//! and storage errors abort the whole apply immediately.

use std::io;
use std::path::Path;
use std::sync::Arc;

use strata_store::{StoreError, scan_workspace, snapshot_at};
use strata_types::{
    ChangeKind, ConversationId, MessageIndex, Snapshot, WorkspaceFileChange, diff,
};
use strata_utils::atomic_write::atomic_write;
use strata_utils::diff::{changed_line_count, count_lines};

use crate::cancel::CancelFlag;
use crate::error::{EngineError, FileOpFailure, Result};
use crate::{ConversationState, Engine, read_state, write_state};

/// What a completed rollback did.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackReport {
    pub restored_files: usize,
    pub removed_files: usize,
    pub truncated_messages: usize,
    pub truncated_snapshots: usize,
}

impl Engine {
    /// Preview the file changes a rollback to `message_index` would apply.
    ///
    /// The "before" side of every change is the live workspace, captured by
    /// scanning the directory now - out-of-band writes since the last
    /// snapshot are caught, not trusted away. No mutation occurs. Unbound
    /// conversations preview as an empty change list.
    pub fn preview_changes_for_message(
        &self,
        id: &ConversationId,
        message_index: MessageIndex,
    ) -> Result<Vec<WorkspaceFileChange>> {
        let state = self.state(id)?;
        let guard = read_state(&state);

        let workspace = match bound_workspace(&guard) {
            Ok(workspace) => workspace.to_path_buf(),
            Err(EngineError::NoSnapshotBound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        // An index preceding any recorded snapshot is a legitimate state for
        // early messages: there is no recorded history to restore, so the
        // diff is empty rather than "delete everything".
        let Some(target) = target_snapshot(&guard, message_index) else {
            return Ok(Vec::new());
        };
        let live = scan_workspace(&workspace)?;

        let mut changes = diff::between(&live, &target);
        for change in &mut changes {
            self.annotate_changed_lines(change, &workspace);
        }
        Ok(changes)
    }

    /// Restore the workspace to its state as of `message_index` and truncate
    /// all later history - both snapshot log entries and messages.
    pub fn rollback_to_message(
        &self,
        id: &ConversationId,
        message_index: MessageIndex,
    ) -> Result<RollbackReport> {
        self.rollback_to_message_with(id, message_index, &CancelFlag::new())
    }

    /// [`Engine::rollback_to_message`] with a cancellation flag, checked up
    /// to the moment the first file write starts.
    pub fn rollback_to_message_with(
        &self,
        id: &ConversationId,
        message_index: MessageIndex,
        cancel: &CancelFlag,
    ) -> Result<RollbackReport> {
        let state = self.state(id)?;
        let mut guard = write_state(&state);
        self.apply_rollback(id, &mut guard, message_index, cancel)
    }

    /// Roll back to `message_index`, replace that message's content, and
    /// return the index processing should resume from. Re-entering message
    /// processing with the edited message is the caller's concern.
    pub fn rewind_and_resend(
        &self,
        id: &ConversationId,
        message_index: MessageIndex,
        new_content: &str,
    ) -> Result<MessageIndex> {
        let state = self.state(id)?;
        let mut guard = write_state(&state);

        self.apply_rollback(id, &mut guard, message_index, &CancelFlag::new())?;

        self.store()
            .update_message_content(id, message_index, new_content)?;
        if let Some(message) = guard
            .messages
            .iter_mut()
            .find(|m| m.index == message_index)
        {
            message.content = new_content.to_string();
        }

        tracing::info!(
            conversation = %id,
            message_index = %message_index,
            "Rewound conversation; resuming after edited message"
        );
        Ok(message_index.next())
    }

    fn apply_rollback(
        &self,
        id: &ConversationId,
        guard: &mut ConversationState,
        message_index: MessageIndex,
        cancel: &CancelFlag,
    ) -> Result<RollbackReport> {
        if !guard.messages.iter().any(|m| m.index == message_index) {
            return Err(EngineError::UnknownMessage {
                conversation: id.clone(),
                index: message_index,
            });
        }

        let mut report = RollbackReport::default();

        match (bound_workspace(guard), target_snapshot(guard, message_index)) {
            (Ok(workspace), Some(target)) => {
                let workspace = workspace.to_path_buf();
                let live = scan_workspace(&workspace)?;
                let changes = diff::between(&live, &target);

                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }

                let (applied, failures) = self.apply_changes(&changes, &workspace, &mut report)?;
                if !failures.is_empty() {
                    tracing::warn!(
                        conversation = %id,
                        applied,
                        failed = failures.len(),
                        "Rollback left workspace partially restored; history untouched"
                    );
                    return Err(EngineError::RollbackIncomplete {
                        applied,
                        total: changes.len(),
                        failures,
                    });
                }

                if let Err(e) = prune_empty_dirs(&workspace) {
                    tracing::warn!(workspace = %workspace.display(), "Failed to prune empty directories: {e}");
                }
            }
            // No bound workspace, or no snapshot recorded at or before the
            // target: nothing to restore, only messages to drop.
            (Err(EngineError::NoSnapshotBound(_)), _) | (Ok(_), None) => {}
            (Err(err), _) => return Err(err),
        }

        report.truncated_snapshots = self.store().truncate_log_after(id, message_index)?;
        if let Some(pos) = guard
            .log
            .iter()
            .position(|entry| entry.message_index > message_index)
        {
            guard.log.truncate(pos);
        }

        report.truncated_messages = self.store().delete_messages_after(id, message_index)?;
        if let Some(pos) = guard
            .messages
            .iter()
            .position(|m| m.index > message_index)
        {
            guard.messages.truncate(pos);
        }

        tracing::info!(
            conversation = %id,
            message_index = %message_index,
            restored = report.restored_files,
            removed = report.removed_files,
            truncated_messages = report.truncated_messages,
            "Rolled back conversation"
        );
        Ok(report)
    }

    /// Write every change's target-side content (or delete paths absent from
    /// the target). Returns the applied count alongside per-file failures
    /// that survived one retry; integrity and storage errors abort instead.
    fn apply_changes(
        &self,
        changes: &[WorkspaceFileChange],
        workspace: &Path,
        report: &mut RollbackReport,
    ) -> Result<(usize, Vec<FileOpFailure>)> {
        let mut applied = 0usize;
        let mut failures = Vec::new();

        for change in changes {
            let mut outcome = self.apply_change(change, workspace);
            if outcome.as_ref().is_err_and(StoreError::is_transient) {
                outcome = self.apply_change(change, workspace);
            }
            match outcome {
                Ok(()) => {
                    applied += 1;
                    match change.kind {
                        ChangeKind::Deleted => report.removed_files += 1,
                        ChangeKind::Added | ChangeKind::Modified => report.restored_files += 1,
                    }
                }
                Err(err) if err.is_transient() => {
                    failures.push(FileOpFailure {
                        path: change.path.clone(),
                        error: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok((applied, failures))
    }

    fn apply_change(
        &self,
        change: &WorkspaceFileChange,
        workspace: &Path,
    ) -> std::result::Result<(), StoreError> {
        let native = change.path.to_native(workspace);
        match change.after {
            Some(hash) => {
                let bytes = self.store().blob(hash)?;
                if let Ok(meta) = std::fs::metadata(&native)
                    && meta.is_dir()
                {
                    return Err(StoreError::Io(io::Error::other(format!(
                        "Refusing to overwrite directory: {}",
                        native.display()
                    ))));
                }
                if let Some(parent) = native.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                atomic_write(&native, &bytes)?;
                Ok(())
            }
            // The file did not exist at the target snapshot.
            None => remove_if_exists(&native).map_err(StoreError::Io),
        }
    }

    /// Annotate a change with a line-level estimate, reading the live side
    /// from disk and the target side from the content store. Best-effort:
    /// annotation failures degrade to `None`, never fail the preview.
    fn annotate_changed_lines(&self, change: &mut WorkspaceFileChange, workspace: &Path) {
        let native = change.path.to_native(workspace);
        change.changed_lines = match change.kind {
            ChangeKind::Modified => {
                let live = std::fs::read(&native).ok();
                let target = change.after.and_then(|hash| self.fetch_for_annotation(hash));
                match (live, target) {
                    (Some(live), Some(target)) => changed_line_count(&live, &target),
                    _ => None,
                }
            }
            ChangeKind::Deleted => std::fs::read(&native).ok().as_deref().and_then(count_lines),
            ChangeKind::Added => change
                .after
                .and_then(|hash| self.fetch_for_annotation(hash))
                .as_deref()
                .and_then(count_lines),
        };
    }

    fn fetch_for_annotation(&self, hash: strata_types::BlobHash) -> Option<Vec<u8>> {
        match self.store().blob(hash) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(blob = %hash, "Failed to read blob for line stats: {e}");
                None
            }
        }
    }
}

/// The workspace directory bound to this conversation, or `NoSnapshotBound`.
fn bound_workspace(state: &ConversationState) -> Result<&Path> {
    state
        .row
        .workspace
        .as_deref()
        .ok_or_else(|| EngineError::NoSnapshotBound(state.row.id.clone()))
}

/// State as of `message_index`: the latest log entry at or before it.
/// `None` means the index precedes any recorded snapshot, which callers
/// treat as an empty diff, never as an empty tree to restore.
fn target_snapshot(
    state: &ConversationState,
    message_index: MessageIndex,
) -> Option<Arc<Snapshot>> {
    snapshot_at(&state.log, message_index).map(|entry| Arc::clone(&entry.snapshot))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(io::Error::other(format!(
            "Refusing to remove directory: {}",
            path.display()
        ))),
        Ok(_meta) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove directories left empty by a restore, bottom-up. The workspace root
/// itself and hidden directories (VCS internals) are never touched.
fn prune_empty_dirs(root: &Path) -> io::Result<()> {
    fn prune(dir: &Path) -> io::Result<bool> {
        let mut empty = true;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let hidden = name.to_string_lossy().starts_with('.');
            if entry.file_type()?.is_dir() && !hidden {
                let child = entry.path();
                if prune(&child)? && std::fs::remove_dir(&child).is_ok() {
                    continue;
                }
            }
            empty = false;
        }
        Ok(empty)
    }

    if root.is_dir() {
        prune(root)?;
    }
    Ok(())
}
