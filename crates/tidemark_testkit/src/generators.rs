//! Property-based test generators using proptest.
//!
//! Strategies keep the invariants the engine relies on: entity ids are
//! non-empty and drawn from a small pool so that generated changes collide.

use crate::fixtures::Note;
use proptest::prelude::*;
use tidemark_sync_protocol::{ChangeOperation, PendingChange, RemoteUpdate};

/// Strategy for entity ids drawn from a pool of `pool` ids.
pub fn entity_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("note-{}", i))
}

/// Strategy for notes with ids from a pool.
pub fn note_strategy(pool: usize) -> impl Strategy<Value = Note> {
    (
        entity_id_strategy(pool),
        "[a-z ]{0,16}",
        "[a-zA-Z0-9 ]{0,64}",
        any::<bool>(),
    )
        .prop_map(|(id, title, body, pinned)| Note {
            id,
            title,
            body,
            pinned,
        })
}

/// Strategy for change operations.
pub fn operation_strategy() -> impl Strategy<Value = ChangeOperation> {
    prop_oneof![
        Just(ChangeOperation::Create),
        Just(ChangeOperation::Update),
        Just(ChangeOperation::Delete),
    ]
}

/// Strategy for a pending change that has not been enqueued yet.
pub fn pending_change_strategy(pool: usize) -> impl Strategy<Value = PendingChange<Note>> {
    (note_strategy(pool), operation_strategy(), 1u64..1_000_000).prop_map(
        |(note, operation, timestamp)| match operation {
            ChangeOperation::Create => PendingChange::create(note).with_timestamp(timestamp),
            ChangeOperation::Update => PendingChange::update(note).with_timestamp(timestamp),
            ChangeOperation::Delete => PendingChange::delete(note.id).with_timestamp(timestamp),
        },
    )
}

/// Strategy for a remote update; roughly one in four is a delete.
pub fn remote_update_strategy(pool: usize) -> impl Strategy<Value = RemoteUpdate<Note>> {
    (note_strategy(pool), 0u8..4, 1u64..1_000_000).prop_map(|(note, kind, timestamp)| {
        if kind == 0 {
            RemoteUpdate::deleted(note.id, timestamp)
        } else {
            let id = note.id.clone();
            RemoteUpdate::upsert(id, note, timestamp)
        }
    })
}

/// Strategy for a batch of remote updates.
pub fn remote_batch_strategy(
    pool: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<RemoteUpdate<Note>>> {
    prop::collection::vec(remote_update_strategy(pool), 0..=max_len)
}

/// Strategy for a batch of pending changes.
pub fn change_batch_strategy(
    pool: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<PendingChange<Note>>> {
    prop::collection::vec(pending_change_strategy(pool), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn ids_stay_in_pool(id in entity_id_strategy(3)) {
            prop_assert!(["note-0", "note-1", "note-2"].contains(&id.as_str()));
        }

        #[test]
        fn changes_have_identity(change in pending_change_strategy(5)) {
            prop_assert!(change.has_identity());
            prop_assert_eq!(change.entity.is_none(), change.is_delete());
        }
    }
}
