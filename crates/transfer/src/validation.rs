use std::path::{Component, Path};

use chunkdock_protocol::{CHUNK_INDEX_WIDTH, CHUNK_SEPARATOR};

use crate::TransferError;

/// Longest accepted name component, in bytes (common filesystem limit).
const MAX_COMPONENT_LEN: usize = 255;

/// Bytes added around a file name by its longest on-disk form, the
/// in-flight chunk `{file}.part.NNNNN.{uuid}.tmp`. The assembler's
/// `.{millis}-{random}-{file}.tmp` adds less.
const STORED_NAME_OVERHEAD: usize = CHUNK_SEPARATOR.len() + CHUNK_INDEX_WIDTH + 1 + 32 + 4;

/// Longest accepted logical file name, in bytes.
pub const MAX_FILE_NAME_LEN: usize = MAX_COMPONENT_LEN - STORED_NAME_OVERHEAD;

/// Validates a caller-supplied name that becomes a single path component
/// (upload base name, upload id, file name or session folder name).
///
/// Rejects:
/// - Empty names and names longer than 255 bytes
/// - `.` and `..`, and names starting with `.` (hidden or temporary entries)
/// - Path separators, drive prefixes and anything that is not exactly one
///   normal path component
/// - Characters outside the allow-list: alphanumerics (any script), space,
///   `-`, `_`, `.`, `+`, `(`, `)`
pub fn validate_name_component(kind: &str, value: &str) -> Result<(), TransferError> {
    if value.is_empty() {
        return Err(TransferError::InvalidSessionKey(format!("empty {kind}")));
    }

    if value.len() > MAX_COMPONENT_LEN {
        return Err(TransferError::InvalidSessionKey(format!(
            "{kind} longer than {MAX_COMPONENT_LEN} bytes"
        )));
    }

    if value.starts_with('.') {
        return Err(TransferError::InvalidSessionKey(format!(
            "{kind} must not start with '.': {value}"
        )));
    }

    if let Some(bad) = value.chars().find(|c| !is_allowed_char(*c)) {
        return Err(TransferError::InvalidSessionKey(format!(
            "{kind} contains disallowed character {bad:?}: {value}"
        )));
    }

    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidSessionKey(format!(
            "{kind} must be a single path component: {value}"
        ))),
    }
}

/// Validates a logical file name: a safe name component short enough that
/// every chunk and output name derived from it fits the filesystem limit.
pub fn validate_file_name(value: &str) -> Result<(), TransferError> {
    validate_name_component("file name", value)?;
    if value.len() > MAX_FILE_NAME_LEN {
        return Err(TransferError::InvalidSessionKey(format!(
            "file name longer than {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

fn is_allowed_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '+' | '(' | ')')
}
