//! Fixture entity and change builders.

use serde::{Deserialize, Serialize};
use tidemark_sync_protocol::{LogicalTime, PendingChange, RemoteUpdate, SyncEntity};

/// A small synchronizable record used throughout the tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Logical id.
    pub id: String,
    /// Title line.
    pub title: String,
    /// Free text.
    pub body: String,
    /// Whether the note is pinned.
    pub pinned: bool,
}

impl SyncEntity for Note {
    const ENTITY_TYPE: &'static str = "note";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Creates a note with an empty body.
pub fn note(id: &str, title: &str) -> Note {
    NoteBuilder::new(id).title(title).build()
}

/// Builder for [`Note`].
#[derive(Debug, Clone)]
pub struct NoteBuilder {
    note: Note,
}

impl NoteBuilder {
    /// Starts a note with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            note: Note {
                id: id.into(),
                title: String::new(),
                body: String::new(),
                pinned: false,
            },
        }
    }

    /// Sets the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.note.title = title.into();
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.note.body = body.into();
        self
    }

    /// Pins the note.
    pub fn pinned(mut self) -> Self {
        self.note.pinned = true;
        self
    }

    /// Finishes the note.
    pub fn build(self) -> Note {
        self.note
    }
}

/// A Create at a fixed timestamp.
pub fn created(n: Note, timestamp: LogicalTime) -> PendingChange<Note> {
    PendingChange::create(n).with_timestamp(timestamp)
}

/// An Update at a fixed timestamp.
pub fn updated(n: Note, timestamp: LogicalTime) -> PendingChange<Note> {
    PendingChange::update(n).with_timestamp(timestamp)
}

/// A Delete at a fixed timestamp.
pub fn deleted(id: &str, timestamp: LogicalTime) -> PendingChange<Note> {
    PendingChange::delete(id).with_timestamp(timestamp)
}

/// A remote upsert of a note.
pub fn remote_upsert(n: Note, timestamp: LogicalTime) -> RemoteUpdate<Note> {
    let id = n.id.clone();
    RemoteUpdate::upsert(id, n, timestamp)
}
