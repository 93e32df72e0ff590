//! Remote sync client: one push or one pull per call.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use std::marker::PhantomData;
use tidemark_sync_protocol::{
    now_millis, ConflictType, EntitySerializer, LogicalTime, PendingChange, PullRequest,
    PullResult, PushRequest, PushResponse, PushResult, RemoteUpdate, SyncConflict, SyncEntity,
    WireChange, WireConflict,
};
use tracing::{debug, warn};

/// Executes push and pull against a remote service.
///
/// A client never retries internally and never deduplicates by entity id;
/// both are the orchestrator's job.
pub trait RemoteSyncClient<T>: Send + Sync {
    /// Uploads pending changes in one request.
    ///
    /// Every input change ends up in exactly one of `successful`, `failed`
    /// or `conflicted_changes`. A transport failure puts all of them in
    /// `failed` and sets `transport_error`.
    fn push(&self, changes: &[PendingChange<T>]) -> PushResult<T>;

    /// Downloads remote changes made after `last_watermark` (exclusive).
    ///
    /// Transport failures are returned as `Err`; the caller must then keep
    /// its watermark.
    fn pull(&self, last_watermark: LogicalTime) -> SyncResult<PullResult<T>>;
}

/// A client for repositories that do not synchronize.
///
/// Push accounts for nothing (changes stay queued), pull observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSyncClient;

impl<T> RemoteSyncClient<T> for NullSyncClient {
    fn push(&self, _changes: &[PendingChange<T>]) -> PushResult<T> {
        PushResult::empty()
    }

    fn pull(&self, last_watermark: LogicalTime) -> SyncResult<PullResult<T>> {
        Ok(PullResult::unchanged(last_watermark))
    }
}

#[derive(Clone)]
enum Outcome {
    Accepted(Option<String>),
    Failed(String),
    Conflicted,
}

/// Protocol implementation of [`RemoteSyncClient`] over a [`SyncTransport`].
///
/// Entities are converted to wire payloads by the injected serializer, so
/// the payload format is independent of the transport.
pub struct ProtocolSyncClient<T, S, X> {
    config: SyncConfig,
    serializer: S,
    transport: X,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S, X> ProtocolSyncClient<T, S, X>
where
    T: SyncEntity,
    S: EntitySerializer<T>,
    X: SyncTransport,
{
    /// Creates a new client.
    pub fn new(config: SyncConfig, serializer: S, transport: X) -> Self {
        Self {
            config,
            serializer,
            transport,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &X {
        &self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn to_wire(&self, change: &PendingChange<T>) -> SyncResult<WireChange> {
        let payload = match &change.entity {
            Some(entity) => Some(self.serializer.encode(entity)?),
            None => None,
        };
        Ok(WireChange {
            entity_type: T::ENTITY_TYPE.to_string(),
            entity_id: change.entity_id.clone(),
            operation: change.operation.to_code(),
            payload,
            local_id: change.local_id.clone(),
            remote_id: change.remote_id.clone(),
            timestamp: change.timestamp,
        })
    }

    fn decode_payload(&self, payload: Option<&[u8]>) -> SyncResult<Option<T>> {
        payload
            .map(|bytes| self.serializer.decode(bytes))
            .transpose()
            .map_err(SyncError::from)
    }

    fn decode_conflict(
        &self,
        wire: &WireConflict,
        local: Option<&PendingChange<T>>,
    ) -> SyncResult<SyncConflict<T>> {
        let conflict_type = ConflictType::from_code(wire.conflict_type)?;
        let local_entity = match local {
            Some(change) => change.entity.clone(),
            None => self.decode_payload(wire.local_payload.as_deref())?,
        };
        let remote_entity = self.decode_payload(wire.remote_payload.as_deref())?;
        Ok(SyncConflict::new(
            wire.entity_id.clone(),
            conflict_type,
            local_entity,
            remote_entity,
            wire.timestamp,
        ))
    }

    /// Maps a push response back onto the changes that were sent.
    ///
    /// `sent[i]` is the input index of the i-th change in the request.
    fn partition(
        &self,
        changes: &[PendingChange<T>],
        sent: &[usize],
        response: PushResponse,
        outcomes: &mut [Option<Outcome>],
    ) -> SyncResult<Vec<SyncConflict<T>>> {
        let resolve = |index: u32| -> SyncResult<usize> {
            sent.get(index as usize).copied().ok_or_else(|| {
                SyncError::Protocol(format!("push response index {} out of range", index))
            })
        };

        let mut conflicts = Vec::with_capacity(response.conflicts.len());
        for wire in &response.conflicts {
            let position = match wire.index {
                Some(index) => Some(resolve(index)?),
                None => sent.iter().copied().find(|&i| {
                    outcomes[i].is_none() && changes[i].entity_id == wire.entity_id
                }),
            };
            let local = position.map(|i| &changes[i]);
            conflicts.push(self.decode_conflict(wire, local)?);
            if let Some(i) = position {
                outcomes[i].get_or_insert(Outcome::Conflicted);
            }
        }
        for failure in &response.failed {
            let i = resolve(failure.index)?;
            outcomes[i].get_or_insert(Outcome::Failed(failure.reason.clone()));
        }
        for ack in &response.successful {
            let i = resolve(ack.index)?;
            outcomes[i].get_or_insert(Outcome::Accepted(ack.remote_id.clone()));
        }
        Ok(conflicts)
    }
}

impl<T, S, X> RemoteSyncClient<T> for ProtocolSyncClient<T, S, X>
where
    T: SyncEntity,
    S: EntitySerializer<T>,
    X: SyncTransport,
{
    fn push(&self, changes: &[PendingChange<T>]) -> PushResult<T> {
        if changes.is_empty() {
            return PushResult::empty();
        }

        let mut outcomes: Vec<Option<Outcome>> = vec![None; changes.len()];
        let mut wire_changes = Vec::with_capacity(changes.len());
        let mut sent = Vec::with_capacity(changes.len());
        for (i, change) in changes.iter().enumerate() {
            match self.to_wire(change) {
                Ok(wire) => {
                    wire_changes.push(wire);
                    sent.push(i);
                }
                Err(e) => {
                    warn!(entity_id = %change.entity_id, error = %e, "could not serialize change");
                    outcomes[i] = Some(Outcome::Failed(e.to_string()));
                }
            }
        }

        let mut conflicts = Vec::new();
        if !wire_changes.is_empty() {
            let request = PushRequest {
                protocol_version: self.config.protocol_version,
                ..PushRequest::new(
                    self.config.principal_id.clone(),
                    self.config.device_id.clone(),
                    wire_changes,
                    now_millis(),
                )
            };
            debug!(changes = request.changes.len(), "pushing changes");

            let response = match self.transport.push(&request) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "push failed at transport level");
                    return PushResult::transport_failed(changes.to_vec(), e.to_string());
                }
            };

            conflicts = match self.partition(changes, &sent, response, &mut outcomes) {
                Ok(conflicts) => conflicts,
                Err(e) => {
                    warn!(error = %e, "malformed push response");
                    return PushResult::transport_failed(changes.to_vec(), e.to_string());
                }
            };
        }

        let mut result = PushResult::empty();
        result.conflicts = conflicts;
        for (change, outcome) in changes.iter().zip(outcomes) {
            match outcome {
                Some(Outcome::Accepted(remote_id)) => {
                    let mut change = change.clone();
                    if let Some(remote_id) = remote_id {
                        change.remote_id = Some(remote_id);
                    }
                    result.successful.push(change);
                }
                Some(Outcome::Failed(reason)) => {
                    debug!(entity_id = %change.entity_id, %reason, "change rejected");
                    result.failed.push(change.clone());
                }
                Some(Outcome::Conflicted) => result.conflicted_changes.push(change.clone()),
                None => {
                    warn!(entity_id = %change.entity_id, "remote did not report on change");
                    result.failed.push(change.clone());
                }
            }
        }
        result
    }

    fn pull(&self, last_watermark: LogicalTime) -> SyncResult<PullResult<T>> {
        let request = PullRequest {
            protocol_version: self.config.protocol_version,
            ..PullRequest::new(
                self.config.principal_id.clone(),
                self.config.device_id.clone(),
                last_watermark,
            )
        };
        let response = self.transport.pull(&request)?;

        let mut updates = Vec::with_capacity(response.updates.len());
        for update in &response.updates {
            if update.entity_type != T::ENTITY_TYPE {
                continue;
            }
            updates.push(RemoteUpdate {
                entity_id: update.entity_id.clone(),
                entity: self.decode_payload(update.payload.as_deref())?,
                timestamp: update.timestamp,
            });
        }

        let conflicts = response
            .conflicts
            .iter()
            .map(|wire| self.decode_conflict(wire, None))
            .collect::<SyncResult<Vec<_>>>()?;

        let new_watermark = if response.new_watermark < last_watermark {
            warn!(
                remote = response.new_watermark,
                local = last_watermark,
                "remote watermark moved backwards, keeping local watermark"
            );
            last_watermark
        } else {
            response.new_watermark
        };

        debug!(
            updates = updates.len(),
            conflicts = conflicts.len(),
            new_watermark,
            "pulled changes"
        );
        Ok(PullResult {
            updates,
            conflicts,
            new_watermark,
        })
    }
}
