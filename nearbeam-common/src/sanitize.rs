//! File name sanitization
//!
//! Applied on both sides of the wire: before a name is framed for sending,
//! and again on receipt before the name touches the local filesystem.

use crate::{FALLBACK_FILE_NAME, MAX_FILE_NAME_BYTES};

/// Characters never allowed in a file name
pub const FORBIDDEN_FILE_NAME_CHARS: &[char] =
    &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Sanitize a file name for filesystem use
///
/// Strips forbidden characters and control characters, trims surrounding
/// whitespace, truncates to [`MAX_FILE_NAME_BYTES`] on a character boundary,
/// and substitutes [`FALLBACK_FILE_NAME`] when nothing usable remains.
///
/// Idempotent: `sanitize_file_name(sanitize_file_name(n)) ==
/// sanitize_file_name(n)` for all inputs.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN_FILE_NAME_CHARS.contains(c) && !c.is_control())
        .collect();

    let trimmed = cleaned.trim();

    // Truncate on a char boundary so multi-byte characters are never split
    let mut end = trimmed.len().min(MAX_FILE_NAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = trimmed[..end].trim_end();

    if truncated.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        truncated.to_string()
    }
}
