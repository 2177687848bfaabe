//! Error types for LuccaNotes Core.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for note operations
pub type NoteResult<T> = Result<T, NoteError>;

/// Main error type for note operations
#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Patch apply failure: {failed} of {total} hunk(s) could not be located")]
    PatchApply { failed: usize, total: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("{0}")]
    Other(String),
}

impl NoteError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NoteError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        NoteError::NotFound(message.into())
    }

    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        NoteError::Network(message.into())
    }

    /// True if retrying the same request cannot succeed (deleted note,
    /// revoked access). Transport and patch failures are retryable.
    pub fn is_permanent(&self) -> bool {
        matches!(self, NoteError::NotFound(_) | NoteError::Unauthorized(_))
    }
}
