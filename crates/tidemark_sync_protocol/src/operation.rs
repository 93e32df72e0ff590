//! Pending local mutations.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Used for ordering and "last writer" heuristics only; it is not a
/// correctness guarantee under clock skew.
pub type LogicalTime = u64;

/// Returns the current wall-clock time as a [`LogicalTime`].
pub fn now_millis() -> LogicalTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as LogicalTime)
        .unwrap_or(0)
}

/// A domain object that can be synchronized.
///
/// The logical identifier is shared by the local and remote representation
/// of the same record and is distinct from any local storage key.
pub trait SyncEntity: Clone + Send + Sync + 'static {
    /// Type name carried on the wire (e.g. `"note"`).
    const ENTITY_TYPE: &'static str;

    /// Stable logical identifier.
    fn entity_id(&self) -> &str;
}

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Entity was created locally.
    Create,
    /// Entity was modified locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl ChangeOperation {
    /// Converts to a numeric code for the wire.
    pub fn to_code(&self) -> u8 {
        match self {
            ChangeOperation::Create => 1,
            ChangeOperation::Update => 2,
            ChangeOperation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        match code {
            1 => Ok(ChangeOperation::Create),
            2 => Ok(ChangeOperation::Update),
            3 => Ok(ChangeOperation::Delete),
            _ => Err(ProtocolError::UnknownCode {
                kind: "operation",
                code,
            }),
        }
    }

    /// Returns true for a delete.
    pub fn is_delete(&self) -> bool {
        matches!(self, ChangeOperation::Delete)
    }
}

/// A local mutation that has not yet been confirmed by the remote.
///
/// # Fields
///
/// - `seq`: position in the pending queue, assigned on enqueue (0 before)
/// - `entity_id`: logical identity of the mutated entity
/// - `entity`: payload at mutation time, `None` for pure deletes
/// - `operation`: Create, Update or Delete
/// - `timestamp`: when the mutation happened
/// - `local_id` / `remote_id`: at least one is present; both once a Create
///   has been acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange<T> {
    /// Queue sequence number.
    pub seq: u64,
    /// Logical entity identifier.
    pub entity_id: String,
    /// Entity payload.
    pub entity: Option<T>,
    /// Operation type.
    pub operation: ChangeOperation,
    /// Time of the local mutation.
    pub timestamp: LogicalTime,
    /// Local-only identifier.
    pub local_id: Option<String>,
    /// Remote authoritative identifier.
    pub remote_id: Option<String>,
}

impl<T: SyncEntity> PendingChange<T> {
    /// Creates a Create change for a new local entity.
    pub fn create(entity: T) -> Self {
        Self::with_entity(entity, ChangeOperation::Create)
    }

    /// Creates an Update change.
    pub fn update(entity: T) -> Self {
        Self::with_entity(entity, ChangeOperation::Update)
    }

    fn with_entity(entity: T, operation: ChangeOperation) -> Self {
        let entity_id = entity.entity_id().to_string();
        Self {
            seq: 0,
            local_id: Some(entity_id.clone()),
            entity_id,
            entity: Some(entity),
            operation,
            timestamp: now_millis(),
            remote_id: None,
        }
    }
}

impl<T> PendingChange<T> {
    /// Creates a Delete change carrying only the entity id.
    pub fn delete(entity_id: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        Self {
            seq: 0,
            local_id: Some(entity_id.clone()),
            entity_id,
            entity: None,
            operation: ChangeOperation::Delete,
            timestamp: now_millis(),
            remote_id: None,
        }
    }

    /// Sets the mutation timestamp.
    pub fn with_timestamp(mut self, timestamp: LogicalTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the remote identifier.
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Sets or clears the local identifier.
    pub fn with_local_id(mut self, local_id: Option<String>) -> Self {
        self.local_id = local_id;
        self
    }

    /// Returns true if this change deletes the entity.
    pub fn is_delete(&self) -> bool {
        self.operation.is_delete()
    }

    /// Returns true once the remote has assigned an identifier.
    pub fn is_acknowledged(&self) -> bool {
        self.remote_id.is_some()
    }

    /// Checks the identifier invariant: at least one id must be present.
    pub fn has_identity(&self) -> bool {
        self.local_id.is_some() || self.remote_id.is_some()
    }
}
