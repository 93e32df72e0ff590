//! Local replica store interface.

use crate::error::SyncResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use tidemark_sync_protocol::SyncEntity;

/// Narrow interface to the local persistence engine.
///
/// The orchestrator only needs keyed reads and writes by logical entity id
/// plus a place to remember the remote identifier assigned on create.
/// Implementations are expected to be fast and local; they are called while
/// a sync cycle is applying remote updates.
pub trait LocalStore<T>: Send + Sync {
    /// Reads the current local version of an entity.
    fn get(&self, entity_id: &str) -> SyncResult<Option<T>>;

    /// Inserts or replaces an entity.
    fn upsert(&self, entity: T) -> SyncResult<()>;

    /// Removes an entity. Removing a missing entity is not an error.
    fn remove(&self, entity_id: &str) -> SyncResult<()>;

    /// Records the remote identifier of an entity.
    fn assign_remote_id(&self, entity_id: &str, remote_id: &str) -> SyncResult<()>;

    /// Returns the remote identifier of an entity, if assigned.
    fn remote_id(&self, entity_id: &str) -> SyncResult<Option<String>>;
}

/// An in-memory local store.
///
/// Suitable for tests and for ephemeral replicas.
pub struct MemoryLocalStore<T> {
    entities: RwLock<HashMap<String, T>>,
    remote_ids: RwLock<HashMap<String, String>>,
}

impl<T: SyncEntity> MemoryLocalStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            remote_ids: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store pre-populated with entities.
    pub fn with_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entities.write();
            for entity in entities {
                map.insert(entity.entity_id().to_string(), entity);
            }
        }
        store
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// All stored entities, ordered by entity id.
    pub fn entities(&self) -> Vec<T> {
        let map = self.entities.read();
        let mut ids: Vec<&String> = map.keys().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| map.get(id).cloned()).collect()
    }
}

impl<T: SyncEntity> Default for MemoryLocalStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncEntity> LocalStore<T> for MemoryLocalStore<T> {
    fn get(&self, entity_id: &str) -> SyncResult<Option<T>> {
        Ok(self.entities.read().get(entity_id).cloned())
    }

    fn upsert(&self, entity: T) -> SyncResult<()> {
        self.entities
            .write()
            .insert(entity.entity_id().to_string(), entity);
        Ok(())
    }

    fn remove(&self, entity_id: &str) -> SyncResult<()> {
        self.entities.write().remove(entity_id);
        Ok(())
    }

    fn assign_remote_id(&self, entity_id: &str, remote_id: &str) -> SyncResult<()> {
        self.remote_ids
            .write()
            .insert(entity_id.to_string(), remote_id.to_string());
        Ok(())
    }

    fn remote_id(&self, entity_id: &str) -> SyncResult<Option<String>> {
        Ok(self.remote_ids.read().get(entity_id).cloned())
    }
}
