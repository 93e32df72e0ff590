//! Pending-change queue.

use crate::config::SyncConfig;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tidemark_sync_protocol::{ChangeOperation, PendingChange};

/// Storage for local changes that have not been confirmed by the remote.
///
/// Each enqueued change receives a sequence number (`PendingChange::seq`)
/// that is unique for the lifetime of the queue. Sequence order is queue
/// order.
pub trait PendingChangeStore<T>: Send + Sync {
    /// Appends a change and returns its sequence number.
    fn enqueue(&self, change: PendingChange<T>) -> u64;

    /// Queued changes for one entity, in queue order.
    fn changes_for(&self, entity_id: &str) -> Vec<PendingChange<T>>;

    /// All queued changes, in queue order.
    fn snapshot(&self) -> Vec<PendingChange<T>>;

    /// Removes the given sequence numbers; returns how many were removed.
    fn remove(&self, seqs: &[u64]) -> usize;

    /// Stamps a remote id onto every queued change of an entity.
    fn assign_remote_id(&self, entity_id: &str, remote_id: &str);

    /// Number of queued changes.
    fn len(&self) -> usize;

    /// Returns true if nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct QueueInner<T> {
    next_seq: u64,
    entries: BTreeMap<u64, PendingChange<T>>,
    by_entity: HashMap<String, Vec<u64>>,
}

impl<T> QueueInner<T> {
    fn unlink(&mut self, entity_id: &str, seq: u64) {
        if let Some(seqs) = self.by_entity.get_mut(entity_id) {
            seqs.retain(|s| *s != seq);
            if seqs.is_empty() {
                self.by_entity.remove(entity_id);
            }
        }
    }
}

/// An in-memory pending-change queue.
///
/// Changes live in an arena keyed by sequence number with a secondary index
/// by entity id. By default every change is kept as-is, so several updates
/// of one entity can coexist. [`MemoryPendingQueue::coalescing`] folds a new
/// change into the latest queued change of the same entity instead.
pub struct MemoryPendingQueue<T> {
    inner: Mutex<QueueInner<T>>,
    coalesce: bool,
}

impl<T: Clone + Send> MemoryPendingQueue<T> {
    /// Creates a queue that keeps every change.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                next_seq: 1,
                entries: BTreeMap::new(),
                by_entity: HashMap::new(),
            }),
            coalesce: false,
        }
    }

    /// Creates a queue that coalesces changes of the same entity.
    ///
    /// The folded change keeps the earliest timestamp and queue position and
    /// carries the latest payload.
    pub fn coalescing() -> Self {
        Self {
            coalesce: true,
            ..Self::new()
        }
    }

    /// Creates a queue as selected by `SyncConfig::coalesce_pending`.
    pub fn from_config(config: &SyncConfig) -> Self {
        if config.coalesce_pending {
            Self::coalescing()
        } else {
            Self::new()
        }
    }

    /// Returns true if this queue coalesces changes.
    pub fn is_coalescing(&self) -> bool {
        self.coalesce
    }
}

impl<T: Clone + Send> Default for MemoryPendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation that results from applying `next` on top of `queued`.
fn fold_operation(
    queued: ChangeOperation,
    next: ChangeOperation,
    acknowledged: bool,
) -> ChangeOperation {
    use ChangeOperation::*;
    match (queued, next) {
        (_, Delete) => Delete,
        (Create, _) => Create,
        (Delete, Create) if !acknowledged => Create,
        (Delete, _) | (Update, _) => Update,
    }
}

impl<T: Clone + Send> PendingChangeStore<T> for MemoryPendingQueue<T> {
    fn enqueue(&self, mut change: PendingChange<T>) -> u64 {
        let mut inner = self.inner.lock();

        if self.coalesce {
            let latest = inner
                .by_entity
                .get(&change.entity_id)
                .and_then(|seqs| seqs.last().copied());
            if let Some(seq) = latest {
                if let Some(queued) = inner.entries.get_mut(&seq) {
                    let acknowledged = queued.remote_id.is_some() || change.remote_id.is_some();
                    queued.operation =
                        fold_operation(queued.operation, change.operation, acknowledged);
                    queued.entity = change.entity;
                    queued.timestamp = queued.timestamp.min(change.timestamp);
                    if queued.local_id.is_none() {
                        queued.local_id = change.local_id;
                    }
                    if queued.remote_id.is_none() {
                        queued.remote_id = change.remote_id;
                    }
                    return seq;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        change.seq = seq;
        inner
            .by_entity
            .entry(change.entity_id.clone())
            .or_default()
            .push(seq);
        inner.entries.insert(seq, change);
        seq
    }

    fn changes_for(&self, entity_id: &str) -> Vec<PendingChange<T>> {
        let inner = self.inner.lock();
        inner
            .by_entity
            .get(entity_id)
            .map(|seqs| {
                seqs.iter()
                    .filter_map(|seq| inner.entries.get(seq).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<PendingChange<T>> {
        self.inner.lock().entries.values().cloned().collect()
    }

    fn remove(&self, seqs: &[u64]) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for seq in seqs {
            if let Some(change) = inner.entries.remove(seq) {
                inner.unlink(&change.entity_id, *seq);
                removed += 1;
            }
        }
        removed
    }

    fn assign_remote_id(&self, entity_id: &str, remote_id: &str) {
        let mut inner = self.inner.lock();
        let seqs = inner.by_entity.get(entity_id).cloned().unwrap_or_default();
        for seq in seqs {
            if let Some(change) = inner.entries.get_mut(&seq) {
                change.remote_id = Some(remote_id.to_string());
            }
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(entity_id: &str, operation: ChangeOperation, body: &str) -> PendingChange<String> {
        PendingChange {
            seq: 0,
            entity_id: entity_id.into(),
            entity: (!operation.is_delete()).then(|| body.to_string()),
            operation,
            timestamp: 100,
            local_id: Some(entity_id.into()),
            remote_id: None,
        }
    }

    #[test]
    fn sequence_numbers_follow_queue_order() {
        let queue = MemoryPendingQueue::new();
        let a = queue.enqueue(change("a", ChangeOperation::Create, "1"));
        let b = queue.enqueue(change("b", ChangeOperation::Create, "2"));
        assert!(a < b);

        let seqs: Vec<u64> = queue.snapshot().iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![a, b]);
    }

    #[test]
    fn repeated_updates_coexist_by_default() {
        let queue = MemoryPendingQueue::new();
        queue.enqueue(change("a", ChangeOperation::Update, "v1"));
        queue.enqueue(change("a", ChangeOperation::Update, "v2"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.changes_for("a").len(), 2);
    }

    #[test]
    fn remove_unlinks_entity_index() {
        let queue = MemoryPendingQueue::new();
        let a = queue.enqueue(change("a", ChangeOperation::Create, "1"));
        queue.enqueue(change("b", ChangeOperation::Create, "2"));

        assert_eq!(queue.remove(&[a, 999]), 1);
        assert!(queue.changes_for("a").is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn assign_remote_id_reaches_later_changes() {
        let queue = MemoryPendingQueue::new();
        queue.enqueue(change("a", ChangeOperation::Create, "1"));
        queue.enqueue(change("a", ChangeOperation::Update, "2"));
        queue.assign_remote_id("a", "r-a");

        assert!(queue
            .changes_for("a")
            .iter()
            .all(|c| c.remote_id.as_deref() == Some("r-a")));
    }

    #[test]
    fn coalescing_keeps_latest_payload_and_earliest_timestamp() {
        let queue = MemoryPendingQueue::coalescing();
        let first = queue.enqueue(change("a", ChangeOperation::Create, "v1").with_timestamp(10));
        let second = queue.enqueue(change("a", ChangeOperation::Update, "v2").with_timestamp(20));

        assert_eq!(first, second);
        let queued = queue.changes_for("a");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].operation, ChangeOperation::Create);
        assert_eq!(queued[0].entity.as_deref(), Some("v2"));
        assert_eq!(queued[0].timestamp, 10);
    }

    #[test]
    fn coalescing_delete_wins() {
        let queue = MemoryPendingQueue::coalescing();
        queue.enqueue(change("a", ChangeOperation::Update, "v1"));
        queue.enqueue(change("a", ChangeOperation::Delete, ""));

        let queued = queue.changes_for("a");
        assert_eq!(queued[0].operation, ChangeOperation::Delete);
        assert!(queued[0].entity.is_none());
    }

    #[test]
    fn config_selects_mode() {
        let config = SyncConfig::default();
        assert!(!MemoryPendingQueue::<String>::from_config(&config).is_coalescing());

        let config = config.with_coalesce_pending(true);
        assert!(MemoryPendingQueue::<String>::from_config(&config).is_coalescing());
    }

    #[test]
    fn fold_rules() {
        use ChangeOperation::*;
        assert_eq!(fold_operation(Create, Update, false), Create);
        assert_eq!(fold_operation(Update, Update, true), Update);
        assert_eq!(fold_operation(Create, Delete, false), Delete);
        assert_eq!(fold_operation(Delete, Create, false), Create);
        assert_eq!(fold_operation(Delete, Create, true), Update);
    }
}
