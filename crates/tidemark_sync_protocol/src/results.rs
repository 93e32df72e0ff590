//! Structured results of a single push or pull.

use crate::conflict::SyncConflict;
use crate::operation::{LogicalTime, PendingChange};

/// Outcome of pushing a batch of pending changes.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResult<T> {
    /// Changes the remote accepted.
    pub successful: Vec<PendingChange<T>>,
    /// Changes that failed transiently and should be retried next cycle.
    pub failed: Vec<PendingChange<T>>,
    /// Changes rejected because of a competing remote mutation.
    pub conflicts: Vec<SyncConflict<T>>,
    /// The pushed changes that the remote rejected with a conflict.
    pub conflicted_changes: Vec<PendingChange<T>>,
    /// Set when the whole request failed at transport level.
    pub transport_error: Option<String>,
}

impl<T> PushResult<T> {
    /// An empty result (nothing pushed).
    pub fn empty() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
            conflicts: Vec::new(),
            conflicted_changes: Vec::new(),
            transport_error: None,
        }
    }

    /// Classifies every change as failed because the request never completed.
    pub fn transport_failed(changes: Vec<PendingChange<T>>, reason: impl Into<String>) -> Self {
        Self {
            failed: changes,
            transport_error: Some(reason.into()),
            ..Self::empty()
        }
    }

    /// Returns true if the request failed at transport level.
    pub fn is_transport_failure(&self) -> bool {
        self.transport_error.is_some()
    }

    /// Total number of changes accounted for.
    pub fn len(&self) -> usize {
        self.successful.len() + self.failed.len() + self.conflicts.len()
    }

    /// Returns true if no change is accounted for.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for PushResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A remote change observed by a pull.
///
/// `entity == None` means the remote deleted the entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUpdate<T> {
    /// Logical entity identifier.
    pub entity_id: String,
    /// New remote version, or `None` for a remote delete.
    pub entity: Option<T>,
    /// When the remote recorded the change.
    pub timestamp: LogicalTime,
}

impl<T> RemoteUpdate<T> {
    /// A remote upsert.
    pub fn upsert(entity_id: impl Into<String>, entity: T, timestamp: LogicalTime) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity: Some(entity),
            timestamp,
        }
    }

    /// A remote delete.
    pub fn deleted(entity_id: impl Into<String>, timestamp: LogicalTime) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity: None,
            timestamp,
        }
    }

    /// Returns true if the remote deleted the entity.
    pub fn is_delete(&self) -> bool {
        self.entity.is_none()
    }
}

/// Outcome of pulling remote changes since a watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult<T> {
    /// Entities changed remotely since the supplied watermark.
    pub updates: Vec<RemoteUpdate<T>>,
    /// Conflicts reported by the remote against locally pending changes.
    pub conflicts: Vec<SyncConflict<T>>,
    /// Watermark to persist for the next cycle, never below the supplied one.
    pub new_watermark: LogicalTime,
}

impl<T> PullResult<T> {
    /// A pull that observed nothing new.
    pub fn unchanged(watermark: LogicalTime) -> Self {
        Self {
            updates: Vec::new(),
            conflicts: Vec::new(),
            new_watermark: watermark,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failure_keeps_every_change() {
        let changes: Vec<PendingChange<String>> =
            vec![PendingChange::delete("a"), PendingChange::delete("b")];
        let result = PushResult::transport_failed(changes, "connection refused");

        assert!(result.is_transport_failure());
        assert_eq!(result.failed.len(), 2);
        assert!(result.successful.is_empty());
        assert!(result.conflicts.is_empty());
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn remote_delete_marker() {
        let update: RemoteUpdate<String> = RemoteUpdate::deleted("e2", 5);
        assert!(update.is_delete());

        let update = RemoteUpdate::upsert("e1", "v".to_string(), 6);
        assert!(!update.is_delete());
    }

    #[test]
    fn unchanged_pull_keeps_watermark() {
        let result: PullResult<String> = PullResult::unchanged(42);
        assert_eq!(result.new_watermark, 42);
        assert!(result.updates.is_empty());
    }
}
