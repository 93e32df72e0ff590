//! Authoritative record store.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tidemark_sync_protocol::LogicalTime;

/// Key of a record: principal, entity type and entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Owning principal.
    pub principal_id: String,
    /// Wire entity type.
    pub entity_type: String,
    /// Logical entity id.
    pub entity_id: String,
}

impl RecordKey {
    /// Creates a new key.
    pub fn new(
        principal_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// Current server-side state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Store-wide revision of the last write.
    pub revision: u64,
    /// Identifier assigned on first create.
    pub remote_id: String,
    /// Encoded entity, `None` for a tombstone.
    pub payload: Option<Vec<u8>>,
    /// Device that wrote last.
    pub device_id: String,
    /// Server time of the last write.
    pub changed_at: LogicalTime,
}

impl Record {
    /// Returns true if the entity is deleted.
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }
}

struct Inner {
    next_revision: u64,
    records: HashMap<RecordKey, Record>,
    by_revision: BTreeMap<u64, RecordKey>,
}

/// In-memory record store.
///
/// Maintains:
/// - The latest record per key, tombstones included
/// - A revision index for watermark scans
///
/// Revisions start at 1 and increase by one per write, across principals.
pub struct RecordStore {
    inner: RwLock<Inner>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_revision: 1,
                records: HashMap::new(),
                by_revision: BTreeMap::new(),
            }),
        }
    }

    /// Returns the latest record for a key.
    pub fn get(&self, key: &RecordKey) -> Option<Record> {
        self.inner.read().records.get(key).cloned()
    }

    /// Writes a payload or tombstone and returns the stored record.
    ///
    /// `remote_id` is used only when the key has no record yet.
    pub fn write(
        &self,
        key: RecordKey,
        payload: Option<Vec<u8>>,
        device_id: &str,
        remote_id: impl FnOnce() -> String,
        changed_at: LogicalTime,
    ) -> Record {
        let mut inner = self.inner.write();
        let revision = inner.next_revision;
        inner.next_revision += 1;

        let existing = inner
            .records
            .get(&key)
            .map(|record| (record.revision, record.remote_id.clone()));
        let remote_id = match existing {
            Some((previous, id)) => {
                inner.by_revision.remove(&previous);
                id
            }
            None => remote_id(),
        };

        let record = Record {
            revision,
            remote_id,
            payload,
            device_id: device_id.to_string(),
            changed_at,
        };
        inner.by_revision.insert(revision, key.clone());
        inner.records.insert(key, record.clone());
        record
    }

    /// Records of a principal written after `since`, in revision order.
    ///
    /// At most `limit` records are returned.
    pub fn changes_since(
        &self,
        principal_id: &str,
        since: u64,
        limit: usize,
    ) -> Vec<(RecordKey, Record)> {
        let inner = self.inner.read();
        inner
            .by_revision
            .range(since.saturating_add(1)..)
            .filter(|(_, key)| key.principal_id == principal_id)
            .take(limit)
            .filter_map(|(_, key)| {
                inner
                    .records
                    .get(key)
                    .map(|record| (key.clone(), record.clone()))
            })
            .collect()
    }

    /// Highest revision written so far (0 when empty).
    pub fn revision(&self) -> u64 {
        self.inner.read().next_revision - 1
    }

    /// Number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if nothing was ever written.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Number of live (non-tombstone) records of a principal.
    pub fn live_count(&self, principal_id: &str) -> usize {
        self.inner
            .read()
            .records
            .iter()
            .filter(|(key, record)| key.principal_id == principal_id && !record.is_tombstone())
            .count()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
