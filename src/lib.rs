//! LuccaNotes Core - the core of the LuccaNotes note-taking application.
//!
//! This library provides:
//! - Data models (Note, Tag) and validation
//! - Database operations (SQLite)
//! - The patch-based content sync engine (diff, fuzzy apply)
//! - The client edit-sync controller (debounced autosave, baseline
//!   bookkeeping) and its async session driver
//! - The persistence boundary, embedded or over HTTP
//!
//! The sync design: the editor never ships a note's full body. Saves
//! carry a patch set diffed against the last-synced baseline; the
//! server applies it to its stored copy atomically, tolerating minor
//! drift through context-based fuzzy matching, and rejects the whole
//! save if any hunk cannot be located. See [`patch`], [`editor`], and
//! [`Database::update_content`](database::Database::update_content).
//!
//! # Feature Flags
//!
//! - `server`: Include the HTTP API server (axum). Not needed for
//!   embedded use.

pub mod client;
pub mod config;
pub mod database;
pub mod editor;
pub mod error;
pub mod models;
pub mod patch;
pub mod session;
pub mod validation;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use database::{Database, LocalNotes};
pub use editor::{EditSync, SaveRequest, SyncState};
pub use error::{NoteError, NoteResult};
pub use models::{Note, NoteWithTags, Tag, TagColor};
pub use patch::{apply_patch, compute_diff, ApplyOutcome, HunkApplication, PatchSet};
pub use session::{EditorSession, NoteStore, SessionEvent};
