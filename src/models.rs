//! Data models for LuccaNotes.
//!
//! This module defines the core entities: Note, Tag, and the tag color
//! palette. All IDs are UUID7; timestamps are UTC, accurate to the second.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Colors available for tag pills in the UI.
///
/// The palette is fixed; tags store the variant name as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TagColor {
    Sky,
    Red,
    Green,
    Violet,
    Yellow,
    LightGray,
    DarkGray,
}

impl TagColor {
    /// Canonical storage name for this color
    pub fn as_str(&self) -> &'static str {
        match self {
            TagColor::Sky => "sky",
            TagColor::Red => "red",
            TagColor::Green => "green",
            TagColor::Violet => "violet",
            TagColor::Yellow => "yellow",
            TagColor::LightGray => "lightGray",
            TagColor::DarkGray => "darkGray",
        }
    }

    /// Parse a storage name back into a color
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sky" => Some(TagColor::Sky),
            "red" => Some(TagColor::Red),
            "green" => Some(TagColor::Green),
            "violet" => Some(TagColor::Violet),
            "yellow" => Some(TagColor::Yellow),
            "lightGray" => Some(TagColor::LightGray),
            "darkGray" => Some(TagColor::DarkGray),
            _ => None,
        }
    }
}

/// Represents a note in the system.
///
/// The `content` field is the authoritative Markdown text, owned by the
/// persistence layer. It is only ever mutated by applying an accepted
/// patch set (see [`crate::patch`]); clients never write it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier for the note (UUID7)
    pub id: Uuid,
    /// Display title
    pub title: String,
    /// The note's Markdown content
    pub content: String,
    /// Identifier of the owning user
    pub user_id: String,
    /// When the note was created
    pub created_at: DateTime<Utc>,
    /// When the note's content or metadata last changed
    pub last_updated: DateTime<Utc>,
}

impl Note {
    /// Create a new empty note with the given title
    pub fn new(title: String, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title,
            content: String::new(),
            user_id,
            created_at: now,
            last_updated: now,
        }
    }

    /// Get the note ID as a hex string
    pub fn id_hex(&self) -> String {
        self.id.simple().to_string()
    }
}

/// Represents a tag used to organize notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique identifier for the tag (UUID7)
    pub id: Uuid,
    /// Display label (unique per user)
    pub label: String,
    /// Pill color in the UI
    pub color: TagColor,
    /// Identifier of the owning user
    pub user_id: String,
    /// When the tag was created
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// Create a new tag with the given label and color
    pub fn new(label: String, color: TagColor, user_id: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            label,
            color,
            user_id,
            created_at: Utc::now(),
        }
    }
}

/// A note together with its tags, as returned by the read endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteWithTags {
    #[serde(flatten)]
    pub note: Note,
    pub tags: Vec<Tag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_creation() {
        let note = Note::new("Groceries".to_string(), "user-1".to_string());

        assert!(!note.id.is_nil());
        assert_eq!(note.title, "Groceries");
        assert!(note.content.is_empty());
        assert_eq!(note.created_at, note.last_updated);
    }

    #[test]
    fn test_tag_creation() {
        let tag = Tag::new("Work".to_string(), TagColor::Sky, "user-1".to_string());

        assert!(!tag.id.is_nil());
        assert_eq!(tag.label, "Work");
        assert_eq!(tag.color, TagColor::Sky);
    }

    #[test]
    fn test_tag_color_round_trip() {
        for color in [
            TagColor::Sky,
            TagColor::Red,
            TagColor::Green,
            TagColor::Violet,
            TagColor::Yellow,
            TagColor::LightGray,
            TagColor::DarkGray,
        ] {
            assert_eq!(TagColor::parse(color.as_str()), Some(color));
        }
        assert_eq!(TagColor::parse("magenta"), None);
    }

    #[test]
    fn test_id_hex_format() {
        let note = Note::new("Test".to_string(), "user-1".to_string());

        let hex = note.id_hex();
        assert_eq!(hex.len(), 32); // UUID without hyphens
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
