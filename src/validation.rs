//! Input validation for note and tag fields.
//!
//! Validation happens at the persistence boundary; the UI may duplicate
//! these checks for friendlier feedback, but the boundary is the
//! authority.

use crate::error::{NoteError, NoteResult};

/// Maximum note title length in characters
pub const MAX_TITLE_LEN: usize = 200;

/// Maximum tag label length in characters
pub const MAX_TAG_LABEL_LEN: usize = 40;

/// Ceiling on stored note content, in bytes. The diff engine is
/// comfortable well past typical note sizes, but it is not meant to be
/// used unboundedly.
pub const MAX_CONTENT_BYTES: usize = 512 * 1024;

/// Validate a note title
pub fn validate_note_title(title: &str) -> NoteResult<()> {
    if title.trim().is_empty() {
        return Err(NoteError::validation("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(NoteError::validation(
            "title",
            format!("must be at most {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(())
}

/// Validate a tag label
pub fn validate_tag_label(label: &str) -> NoteResult<()> {
    if label.trim().is_empty() {
        return Err(NoteError::validation("label", "must not be empty"));
    }
    if label.chars().count() > MAX_TAG_LABEL_LEN {
        return Err(NoteError::validation(
            "label",
            format!("must be at most {MAX_TAG_LABEL_LEN} characters"),
        ));
    }
    Ok(())
}

/// Validate the size of note content about to be persisted
pub fn validate_content_size(content: &str) -> NoteResult<()> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(NoteError::validation(
            "content",
            format!("must be at most {MAX_CONTENT_BYTES} bytes"),
        ));
    }
    Ok(())
}
