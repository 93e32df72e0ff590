//! Open conflicts awaiting external resolution.

use std::collections::HashMap;
use tidemark_sync_protocol::SyncConflict;

/// The set of unresolved conflicts, keyed by entity id.
///
/// Recording a conflict for an id that is already open replaces the older
/// entry: a recurring unresolved conflict is still a single open issue.
#[derive(Debug, Clone)]
pub struct ConflictRegistry<T> {
    open: HashMap<String, SyncConflict<T>>,
}

impl<T: Clone> ConflictRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
        }
    }

    /// Records a conflict; returns the entry it replaced, if any.
    pub fn record(&mut self, conflict: SyncConflict<T>) -> Option<SyncConflict<T>> {
        self.open.insert(conflict.entity_id.clone(), conflict)
    }

    /// Records several conflicts in order.
    pub fn record_all(&mut self, conflicts: impl IntoIterator<Item = SyncConflict<T>>) {
        for conflict in conflicts {
            self.record(conflict);
        }
    }

    /// Returns the open conflict for an entity.
    pub fn get(&self, entity_id: &str) -> Option<&SyncConflict<T>> {
        self.open.get(entity_id)
    }

    /// Returns true if the entity has an open conflict.
    pub fn contains(&self, entity_id: &str) -> bool {
        self.open.contains_key(entity_id)
    }

    /// Removes and returns the open conflict for an entity.
    pub fn take(&mut self, entity_id: &str) -> Option<SyncConflict<T>> {
        self.open.remove(entity_id)
    }

    /// All open conflicts, oldest detection first (ties by entity id).
    pub fn open_conflicts(&self) -> Vec<SyncConflict<T>> {
        let mut conflicts: Vec<SyncConflict<T>> = self.open.values().cloned().collect();
        conflicts.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        conflicts
    }

    /// Number of open conflicts.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Returns true if nothing is open.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Drops every open conflict.
    pub fn clear(&mut self) {
        self.open.clear();
    }
}

impl<T: Clone> Default for ConflictRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
