//! Database operations for LuccaNotes.
//!
//! All data access goes through SQLite. UUIDs are stored as BLOB
//! (16 bytes); timestamps are Unix seconds (INTEGER) for timezone
//! safety. Every accessor takes the caller's user id and scopes the
//! query to it, so a foreign or unknown id reads as "not found".
//!
//! Note content has a single writer: [`Database::update_content`],
//! which applies a patch set inside one transaction. No other path
//! mutates stored content, which keeps the client's diff/baseline model
//! consistent.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, NoteWithTags, Tag, TagColor};
use crate::patch::{apply_patch, PatchSet};
use crate::validation::{validate_content_size, validate_note_title, validate_tag_label};

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection
    pub fn new<P: AsRef<Path>>(db_path: P) -> NoteResult<Self> {
        let conn = Connection::open(db_path)?;

        // WAL for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> NoteResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let mut db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_database(&mut self) -> NoteResult<()> {
        self.conn.execute_batch(
            r#"
            -- Notes, UUID7 BLOB primary key, Unix-second timestamps
            CREATE TABLE IF NOT EXISTS notes (
                id BLOB PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_updated INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id BLOB PRIMARY KEY,
                label TEXT NOT NULL,
                color TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Note/tag junction
            CREATE TABLE IF NOT EXISTS note_tags (
                note_id BLOB NOT NULL,
                tag_id BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE,
                PRIMARY KEY (note_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_notes_user ON notes (user_id);
            CREATE INDEX IF NOT EXISTS idx_tags_user ON tags (user_id);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Notes
    // =========================================================================

    /// Create a new note, optionally attached to existing tags
    pub fn create_note(
        &mut self,
        title: &str,
        user_id: &str,
        tag_ids: &[Uuid],
    ) -> NoteResult<NoteWithTags> {
        validate_note_title(title)?;
        let note = Note::new(title.to_string(), user_id.to_string());

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO notes (id, title, content, user_id, created_at, last_updated)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                note.id.as_bytes().to_vec(),
                note.title,
                note.content,
                note.user_id,
                note.created_at.timestamp(),
                note.last_updated.timestamp(),
            ],
        )?;
        for tag_id in tag_ids {
            let linked = tx.execute(
                "INSERT INTO note_tags (note_id, tag_id, created_at)
                 SELECT ?, id, strftime('%s', 'now') FROM tags WHERE id = ? AND user_id = ?",
                params![
                    note.id.as_bytes().to_vec(),
                    tag_id.as_bytes().to_vec(),
                    user_id
                ],
            )?;
            if linked == 0 {
                return Err(NoteError::not_found(format!("tag {tag_id}")));
            }
        }
        tx.commit()?;

        tracing::debug!(note_id = %note.id, "note created");
        self.get_note(note.id, user_id)?
            .ok_or_else(|| NoteError::not_found(format!("note {}", note.id)))
    }

    /// Get a note with its tags. Returns None for unknown ids and for
    /// notes owned by someone else.
    pub fn get_note(&self, note_id: Uuid, user_id: &str) -> NoteResult<Option<NoteWithTags>> {
        let note = self
            .conn
            .query_row(
                "SELECT id, title, content, user_id, created_at, last_updated
                 FROM notes WHERE id = ? AND user_id = ?",
                params![note_id.as_bytes().to_vec(), user_id],
                row_to_note,
            )
            .optional()?;

        let Some(note) = note else {
            return Ok(None);
        };
        let tags = self.get_note_tags(note_id)?;
        Ok(Some(NoteWithTags { note, tags }))
    }

    /// Get exactly the stored content of a note, no normalization.
    ///
    /// Seeds the editor buffer and baseline at session start; returning
    /// anything but the verbatim stored text would break baseline/server
    /// agreement.
    pub fn get_note_content(&self, note_id: Uuid, user_id: &str) -> NoteResult<Option<String>> {
        let content = self
            .conn
            .query_row(
                "SELECT content FROM notes WHERE id = ? AND user_id = ?",
                params![note_id.as_bytes().to_vec(), user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(content)
    }

    /// Get all notes for a user, newest first
    pub fn get_all_notes(&self, user_id: &str) -> NoteResult<Vec<NoteWithTags>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, user_id, created_at, last_updated
             FROM notes WHERE user_id = ? ORDER BY last_updated DESC",
        )?;
        let notes: Vec<Note> = stmt
            .query_map([user_id], row_to_note)?
            .collect::<Result<_, _>>()?;

        let mut result = Vec::with_capacity(notes.len());
        for note in notes {
            let tags = self.get_note_tags(note.id)?;
            result.push(NoteWithTags { note, tags });
        }
        Ok(result)
    }

    /// Rename a note
    pub fn rename_note(
        &mut self,
        note_id: Uuid,
        user_id: &str,
        new_title: &str,
    ) -> NoteResult<NoteWithTags> {
        validate_note_title(new_title)?;
        let updated = self.conn.execute(
            "UPDATE notes SET title = ?, last_updated = ? WHERE id = ? AND user_id = ?",
            params![
                new_title,
                Utc::now().timestamp(),
                note_id.as_bytes().to_vec(),
                user_id
            ],
        )?;
        if updated == 0 {
            return Err(NoteError::not_found(format!("note {note_id}")));
        }
        self.get_note(note_id, user_id)?
            .ok_or_else(|| NoteError::not_found(format!("note {note_id}")))
    }

    /// Delete a note. Returns true if a row was removed.
    pub fn delete_note(&mut self, note_id: Uuid, user_id: &str) -> NoteResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM notes WHERE id = ? AND user_id = ?",
            params![note_id.as_bytes().to_vec(), user_id],
        )?;
        Ok(deleted > 0)
    }

    /// Apply a patch set to a note's stored content.
    ///
    /// The whole operation is one transaction: load, apply, persist. If
    /// any hunk fails to locate, the operation is rejected and nothing
    /// is written; partial application would silently lose user text.
    pub fn update_content(
        &mut self,
        note_id: Uuid,
        user_id: &str,
        patches: &PatchSet,
    ) -> NoteResult<Note> {
        let tx = self.conn.transaction()?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT content FROM notes WHERE id = ? AND user_id = ?",
                params![note_id.as_bytes().to_vec(), user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Err(NoteError::not_found(format!("note {note_id}")));
        };

        let outcome = apply_patch(patches, &stored);
        if !outcome.fully_applied() {
            let failed = outcome.failed_hunks();
            tracing::warn!(
                note_id = %note_id,
                failed = failed.len(),
                total = patches.len(),
                "rejecting patch set"
            );
            return Err(NoteError::PatchApply {
                failed: failed.len(),
                total: patches.len(),
            });
        }
        if !outcome.is_clean() {
            tracing::debug!(note_id = %note_id, "patch set applied with fuzzy hunks");
        }
        validate_content_size(&outcome.text)?;

        let now = Utc::now().timestamp();
        tx.execute(
            "UPDATE notes SET content = ?, last_updated = ? WHERE id = ?",
            params![outcome.text, now, note_id.as_bytes().to_vec()],
        )?;
        tx.commit()?;

        self.conn
            .query_row(
                "SELECT id, title, content, user_id, created_at, last_updated
                 FROM notes WHERE id = ?",
                params![note_id.as_bytes().to_vec()],
                row_to_note,
            )
            .map_err(NoteError::Database)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Create a new tag
    pub fn create_tag(&mut self, label: &str, color: TagColor, user_id: &str) -> NoteResult<Tag> {
        validate_tag_label(label)?;
        let tag = Tag::new(label.to_string(), color, user_id.to_string());
        self.conn.execute(
            "INSERT INTO tags (id, label, color, user_id, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                tag.id.as_bytes().to_vec(),
                tag.label,
                tag.color.as_str(),
                tag.user_id,
                tag.created_at.timestamp(),
            ],
        )?;
        Ok(tag)
    }

    /// Get all tags for a user, oldest first
    pub fn get_all_tags(&self, user_id: &str) -> NoteResult<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, label, color, user_id, created_at
             FROM tags WHERE user_id = ? ORDER BY created_at ASC",
        )?;
        let tags = stmt
            .query_map([user_id], row_to_tag)?
            .collect::<Result<_, _>>()?;
        Ok(tags)
    }

    /// Delete a tag (detaches it from all notes via cascade)
    pub fn delete_tag(&mut self, tag_id: Uuid, user_id: &str) -> NoteResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM tags WHERE id = ? AND user_id = ?",
            params![tag_id.as_bytes().to_vec(), user_id],
        )?;
        Ok(deleted > 0)
    }

    /// Attach a tag to a note
    pub fn add_tag(&mut self, note_id: Uuid, tag_id: Uuid, user_id: &str) -> NoteResult<()> {
        self.require_owned_note(note_id, user_id)?;
        let linked = self.conn.execute(
            "INSERT OR IGNORE INTO note_tags (note_id, tag_id, created_at)
             SELECT ?, id, strftime('%s', 'now') FROM tags WHERE id = ? AND user_id = ?",
            params![
                note_id.as_bytes().to_vec(),
                tag_id.as_bytes().to_vec(),
                user_id
            ],
        )?;
        if linked == 0 {
            // Either the tag is foreign/unknown, or the link exists.
            let tag_exists: bool = self.conn.query_row(
                "SELECT COUNT(*) > 0 FROM tags WHERE id = ? AND user_id = ?",
                params![tag_id.as_bytes().to_vec(), user_id],
                |row| row.get(0),
            )?;
            if !tag_exists {
                return Err(NoteError::not_found(format!("tag {tag_id}")));
            }
        }
        Ok(())
    }

    /// Detach a tag from a note
    pub fn remove_tag(&mut self, note_id: Uuid, tag_id: Uuid, user_id: &str) -> NoteResult<()> {
        self.require_owned_note(note_id, user_id)?;
        self.conn.execute(
            "DELETE FROM note_tags WHERE note_id = ? AND tag_id = ?",
            params![note_id.as_bytes().to_vec(), tag_id.as_bytes().to_vec()],
        )?;
        Ok(())
    }

    // Internal

    fn get_note_tags(&self, note_id: Uuid) -> NoteResult<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.label, t.color, t.user_id, t.created_at
             FROM tags t
             JOIN note_tags nt ON nt.tag_id = t.id
             WHERE nt.note_id = ?
             ORDER BY nt.created_at ASC",
        )?;
        let tags = stmt
            .query_map([note_id.as_bytes().to_vec()], row_to_tag)?
            .collect::<Result<_, _>>()?;
        Ok(tags)
    }

    fn require_owned_note(&self, note_id: Uuid, user_id: &str) -> NoteResult<()> {
        let exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM notes WHERE id = ? AND user_id = ?",
            params![note_id.as_bytes().to_vec(), user_id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(NoteError::not_found(format!("note {note_id}")))
        }
    }
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: read_uuid(row, 0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        user_id: row.get(3)?,
        created_at: read_timestamp(row, 4)?,
        last_updated: read_timestamp(row, 5)?,
    })
}

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let color_name: String = row.get(2)?;
    let color = TagColor::parse(&color_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown tag color: {color_name}").into(),
        )
    })?;
    Ok(Tag {
        id: read_uuid(row, 0)?,
        label: row.get(1)?,
        color,
        user_id: row.get(3)?,
        created_at: read_timestamp(row, 4)?,
    })
}

fn read_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let bytes: Vec<u8> = row.get(idx)?;
    Uuid::from_slice(&bytes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Blob,
            e.to_string().into(),
        )
    })
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {secs}").into(),
        )
    })
}

/// Embedded persistence boundary: the database behind the
/// [`NoteStore`](crate::session::NoteStore) seam, scoped to one user.
#[derive(Clone)]
pub struct LocalNotes {
    db: Arc<Mutex<Database>>,
    user_id: String,
}

impl LocalNotes {
    pub fn new(db: Arc<Mutex<Database>>, user_id: impl Into<String>) -> Self {
        Self {
            db,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl crate::session::NoteStore for LocalNotes {
    async fn get_note(&self, id: Uuid) -> NoteResult<Note> {
        let db = self.db.lock().unwrap();
        db.get_note(id, &self.user_id)?
            .map(|n| n.note)
            .ok_or_else(|| NoteError::not_found(format!("note {id}")))
    }

    async fn get_content(&self, id: Uuid) -> NoteResult<String> {
        let db = self.db.lock().unwrap();
        db.get_note_content(id, &self.user_id)?
            .ok_or_else(|| NoteError::not_found(format!("note {id}")))
    }

    async fn update_content(&self, id: Uuid, patches: &PatchSet) -> NoteResult<Note> {
        let mut db = self.db.lock().unwrap();
        db.update_content(id, &self.user_id, patches)
    }
}
