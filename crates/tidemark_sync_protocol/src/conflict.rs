//! Conflict classification.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::LogicalTime;
use serde::{Deserialize, Serialize};

/// How a local and a remote mutation collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Both sides modified the entity.
    BothModified,
    /// Local side deleted, remote side modified.
    LocalDeletedRemoteModified,
    /// Local side modified, remote side deleted.
    LocalModifiedRemoteDeleted,
    /// Both sides created an entity with the same identity.
    DuplicateCreation,
}

impl ConflictType {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictType::BothModified => 1,
            ConflictType::LocalDeletedRemoteModified => 2,
            ConflictType::LocalModifiedRemoteDeleted => 3,
            ConflictType::DuplicateCreation => 4,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        match code {
            1 => Ok(ConflictType::BothModified),
            2 => Ok(ConflictType::LocalDeletedRemoteModified),
            3 => Ok(ConflictType::LocalModifiedRemoteDeleted),
            4 => Ok(ConflictType::DuplicateCreation),
            _ => Err(ProtocolError::UnknownCode {
                kind: "conflict type",
                code,
            }),
        }
    }

    /// Classifies a collision from which sides deleted the entity.
    ///
    /// Returns `None` when both sides deleted it: that is agreement, not a
    /// conflict.
    pub fn classify(local_deleted: bool, remote_deleted: bool) -> Option<Self> {
        match (local_deleted, remote_deleted) {
            (false, false) => Some(ConflictType::BothModified),
            (true, false) => Some(ConflictType::LocalDeletedRemoteModified),
            (false, true) => Some(ConflictType::LocalModifiedRemoteDeleted),
            (true, true) => None,
        }
    }
}

/// A pair of competing mutations on the same logical entity.
///
/// An absent side means that side deleted the entity. Conflicts are
/// terminal: they are handed to the caller and never auto-resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict<T> {
    /// Local version, if the local side did not delete.
    pub local_entity: Option<T>,
    /// Remote version, if the remote side did not delete.
    pub remote_entity: Option<T>,
    /// Classification.
    pub conflict_type: ConflictType,
    /// Shared logical identity.
    pub entity_id: String,
    /// When the conflict was detected.
    pub timestamp: LogicalTime,
}

impl<T> SyncConflict<T> {
    /// Creates a new conflict.
    pub fn new(
        entity_id: impl Into<String>,
        conflict_type: ConflictType,
        local_entity: Option<T>,
        remote_entity: Option<T>,
        timestamp: LogicalTime,
    ) -> Self {
        Self {
            local_entity,
            remote_entity,
            conflict_type,
            entity_id: entity_id.into(),
            timestamp,
        }
    }

    /// Returns true if the local side deleted the entity.
    pub fn local_deleted(&self) -> bool {
        matches!(self.conflict_type, ConflictType::LocalDeletedRemoteModified)
    }

    /// Returns true if the remote side deleted the entity.
    pub fn remote_deleted(&self) -> bool {
        matches!(self.conflict_type, ConflictType::LocalModifiedRemoteDeleted)
    }
}
