//! Line-change estimation for change previews.

use std::str;

use similar::{ChangeTag, TextDiff};

/// Returns true if the data appears to be binary (NUL byte in the first 8KB).
#[must_use]
pub fn is_binary(bytes: &[u8]) -> bool {
    let probe = &bytes[..bytes.len().min(8192)];
    probe.contains(&0)
}

/// Number of lines in `bytes`, for Added/Deleted preview annotations.
///
/// Returns `None` for binary content, where a line count is meaningless.
#[must_use]
pub fn count_lines(bytes: &[u8]) -> Option<u32> {
    if is_binary(bytes) {
        return None;
    }
    let text = str::from_utf8(bytes).ok()?;
    Some(text.lines().count() as u32)
}

/// Total changed lines (insertions + deletions) between two file contents.
///
/// Returns `None` when either side is binary. Identical contents yield
/// `Some(0)`, which callers use to drop spurious Modified entries.
#[must_use]
pub fn changed_line_count(old_bytes: &[u8], new_bytes: &[u8]) -> Option<u32> {
    if is_binary(old_bytes) || is_binary(new_bytes) {
        return None;
    }
    let old_text = str::from_utf8(old_bytes).ok()?;
    let new_text = str::from_utf8(new_bytes).ok()?;

    let diff = TextDiff::from_lines(old_text, new_text);

    let mut changed: u32 = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert | ChangeTag::Delete => changed += 1,
            ChangeTag::Equal => {}
        }
    }
    Some(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_detection() {
        assert!(is_binary(b"abc\0def"));
        assert!(!is_binary(b"plain text\nwith lines\n"));
        assert!(!is_binary(b""));
    }

    #[test]
    fn line_counts() {
        assert_eq!(count_lines(b""), Some(0));
        assert_eq!(count_lines(b"one\ntwo\n"), Some(2));
        assert_eq!(count_lines(b"no trailing newline"), Some(1));
        assert_eq!(count_lines(b"\0"), None);
    }

    #[test]
    fn changed_lines_between_texts() {
        assert_eq!(changed_line_count(b"a\nb\nc\n", b"a\nb\nc\n"), Some(0));
        // One line replaced: one delete + one insert.
        assert_eq!(changed_line_count(b"a\nb\nc\n", b"a\nX\nc\n"), Some(2));
        assert_eq!(changed_line_count(b"", b"a\nb\n"), Some(2));
        assert_eq!(changed_line_count(b"\0", b"text"), None);
    }
}
