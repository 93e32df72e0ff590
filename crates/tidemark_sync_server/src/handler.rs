//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{Record, RecordKey, RecordStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tidemark_sync_protocol::{
    now_millis, ChangeOperation, ConflictType, LogicalTime, PullRequest, PullResponse, PushAck,
    PushFailure, PushRequest, PushResponse, WireChange, WireConflict, WireUpdate,
    PROTOCOL_VERSION,
};
use tracing::{debug, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record store (shared across all handlers).
    pub store: Arc<RecordStore>,
    /// Device sessions ((principal_id, device_id) -> session info).
    sessions: RwLock<HashMap<(String, String), DeviceSession>>,
}

/// What the server knows about a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSession {
    /// Watermark returned by the device's last pull.
    pub last_watermark: u64,
    /// Server time of the device's last request.
    pub last_seen: LogicalTime,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        Self {
            config,
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn touch(&self, principal_id: &str, device_id: &str, watermark: Option<u64>) {
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry((principal_id.to_string(), device_id.to_string()))
            .or_insert(DeviceSession {
                last_watermark: 0,
                last_seen: 0,
            });
        session.last_seen = now_millis();
        if let Some(watermark) = watermark {
            session.last_watermark = watermark;
        }
    }

    /// Gets a device session.
    pub fn session(&self, principal_id: &str, device_id: &str) -> Option<DeviceSession> {
        self.sessions
            .read()
            .get(&(principal_id.to_string(), device_id.to_string()))
            .copied()
    }

    /// Number of devices that have talked to the server.
    pub fn device_count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Per-change verdict of a push.
enum Verdict {
    Accepted(Option<String>),
    Rejected(String),
    Conflict(ConflictType, Option<Vec<u8>>),
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    fn check_version(actual: u16) -> ServerResult<()> {
        if actual != PROTOCOL_VERSION {
            return Err(ServerError::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                actual,
            });
        }
        Ok(())
    }

    fn check_identity(principal_id: &str, device_id: &str) -> ServerResult<()> {
        if principal_id.is_empty() {
            return Err(ServerError::InvalidRequest("missing principal id".into()));
        }
        if device_id.is_empty() {
            return Err(ServerError::InvalidRequest("missing device id".into()));
        }
        Ok(())
    }

    /// Handles a pull request.
    ///
    /// Returns records changed after `since_watermark`; the new watermark
    /// is the highest revision scanned. Pulling twice from the same
    /// watermark yields the same response if nothing was written between.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        Self::check_version(request.protocol_version)?;
        Self::check_identity(&request.principal_id, &request.device_id)?;

        let config = &self.context.config;
        let scanned = self.context.store.changes_since(
            &request.principal_id,
            request.since_watermark,
            config.max_pull_batch as usize,
        );
        let new_watermark = scanned
            .last()
            .map(|(_, record)| record.revision)
            .unwrap_or(request.since_watermark);

        let updates: Vec<WireUpdate> = scanned
            .into_iter()
            .filter(|(_, record)| {
                !(config.skip_own_changes && record.device_id == request.device_id)
            })
            .map(|(key, record)| WireUpdate {
                entity_type: key.entity_type,
                entity_id: key.entity_id,
                payload: record.payload,
                timestamp: record.changed_at,
            })
            .collect();

        debug!(
            principal = %request.principal_id,
            device = %request.device_id,
            since = request.since_watermark,
            updates = updates.len(),
            new_watermark,
            "pull handled"
        );
        self.context.touch(
            &request.principal_id,
            &request.device_id,
            Some(new_watermark),
        );
        Ok(PullResponse::new(updates, new_watermark))
    }

    /// Handles a push request.
    ///
    /// Each change is validated and checked for conflicts independently, in
    /// request order, so a later change sees the writes of earlier ones.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        Self::check_version(request.protocol_version)?;
        Self::check_identity(&request.principal_id, &request.device_id)?;

        let max = self.context.config.max_push_batch as usize;
        if request.changes.len() > max {
            warn!(changes = request.changes.len(), max, "push batch too large");
            return Err(ServerError::InvalidRequest(format!(
                "too many changes: {} > {}",
                request.changes.len(),
                max
            )));
        }

        let mut response = PushResponse::default();
        for (index, change) in request.changes.into_iter().enumerate() {
            let index = u32::try_from(index)
                .map_err(|_| ServerError::InvalidRequest("push batch too large".into()))?;
            let entity_id = change.entity_id.clone();
            let timestamp = now_millis();
            let local_payload = change.payload.clone();

            match self.apply_change(&request.principal_id, &request.device_id, change) {
                Verdict::Accepted(remote_id) => {
                    response.successful.push(PushAck { index, remote_id })
                }
                Verdict::Rejected(reason) => {
                    debug!(%entity_id, %reason, "change rejected");
                    response.failed.push(PushFailure { index, reason });
                }
                Verdict::Conflict(conflict_type, remote_payload) => {
                    debug!(%entity_id, ?conflict_type, "conflict detected");
                    response.conflicts.push(WireConflict {
                        index: Some(index),
                        entity_id,
                        conflict_type: conflict_type.to_code(),
                        local_payload,
                        remote_payload,
                        timestamp,
                    });
                }
            }
        }

        debug!(
            principal = %request.principal_id,
            device = %request.device_id,
            accepted = response.successful.len(),
            failed = response.failed.len(),
            conflicts = response.conflicts.len(),
            "push handled"
        );
        self.context
            .touch(&request.principal_id, &request.device_id, None);
        Ok(response)
    }

    fn apply_change(&self, principal_id: &str, device_id: &str, change: WireChange) -> Verdict {
        let operation = match ChangeOperation::from_code(change.operation) {
            Ok(operation) => operation,
            Err(e) => return Verdict::Rejected(e.to_string()),
        };
        if change.entity_id.is_empty() || change.entity_type.is_empty() {
            return Verdict::Rejected("missing entity type or id".into());
        }
        if !operation.is_delete() && change.payload.is_none() {
            return Verdict::Rejected(format!("{:?} without payload", operation));
        }

        let key = RecordKey::new(principal_id, &change.entity_type, &change.entity_id);
        let existing = self.context.store.get(&key);
        // A record written by another device after the local mutation is a
        // concurrent edit.
        let concurrent = |record: &Record| {
            record.device_id != device_id && record.changed_at > change.timestamp
        };

        match (operation, existing) {
            (ChangeOperation::Create, Some(record)) if !record.is_tombstone() => {
                if record.device_id == device_id && record.payload == change.payload {
                    // Replayed create whose acknowledgement was lost.
                    return Verdict::Accepted(Some(record.remote_id));
                }
                Verdict::Conflict(ConflictType::DuplicateCreation, record.payload)
            }
            (ChangeOperation::Update, None) => Verdict::Rejected("unknown entity".into()),
            (ChangeOperation::Update, Some(record)) if concurrent(&record) => {
                let conflict_type = if record.is_tombstone() {
                    ConflictType::LocalModifiedRemoteDeleted
                } else {
                    ConflictType::BothModified
                };
                Verdict::Conflict(conflict_type, record.payload)
            }
            (ChangeOperation::Delete, None) => Verdict::Accepted(change.remote_id),
            (ChangeOperation::Delete, Some(record)) if record.is_tombstone() => {
                Verdict::Accepted(Some(record.remote_id))
            }
            (ChangeOperation::Delete, Some(record)) if concurrent(&record) => {
                Verdict::Conflict(ConflictType::LocalDeletedRemoteModified, record.payload)
            }
            (_, _) => {
                let payload = if operation.is_delete() {
                    None
                } else {
                    change.payload
                };
                let record = self.context.store.write(
                    key,
                    payload,
                    device_id,
                    || uuid::Uuid::new_v4().to_string(),
                    now_millis(),
                );
                Verdict::Accepted(Some(record.remote_id))
            }
        }
    }
}
