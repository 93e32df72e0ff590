//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{DeviceSession, HandlerContext, RequestHandler};
use crate::store::RecordStore;
use std::sync::Arc;
use tidemark_sync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse, SyncMessage};
use tracing::warn;

/// The sync server.
///
/// Holds the authoritative copy of every principal's records and answers
/// pull and push requests from devices.
///
/// # Example
///
/// ```
/// use tidemark_sync_server::{ServerConfig, SyncServer};
/// use tidemark_sync_protocol::PullRequest;
///
/// let server = SyncServer::new(ServerConfig::default());
/// let response = server
///     .handle_pull(PullRequest::new("alice", "phone", 0))
///     .unwrap();
/// assert!(response.updates.is_empty());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(RecordStore::new()))
    }

    /// Creates a sync server over an existing record store.
    pub fn with_store(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(request)
    }

    /// Handles a sync message (dispatches to appropriate handler).
    pub fn handle_message(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        match message {
            SyncMessage::PullRequest(req) => self.handle_pull(req).map(SyncMessage::PullResponse),
            SyncMessage::PushRequest(req) => self.handle_push(req).map(SyncMessage::PushResponse),
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected message type {}",
                other.type_code()
            ))),
        }
    }

    /// Handles a CBOR-encoded POST to a sync endpoint.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.dispatch(path, body).map_err(|e| {
            warn!(path, error = %e, "request failed");
            e.to_string()
        })
    }

    fn dispatch(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            PullRequest::ENDPOINT => {
                let request = PullRequest::decode(body)?;
                Ok(self.handle_pull(request)?.encode()?)
            }
            PushRequest::ENDPOINT => {
                let request = PushRequest::decode(body)?;
                Ok(self.handle_push(request)?.encode()?)
            }
            _ => Err(ServerError::UnknownEndpoint(path.to_string())),
        }
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.context.store
    }

    /// Returns the highest revision written.
    pub fn revision(&self) -> u64 {
        self.context.store.revision()
    }

    /// Returns the number of stored records, tombstones included.
    pub fn record_count(&self) -> usize {
        self.context.store.len()
    }

    /// Returns what the server knows about a device.
    pub fn session(&self, principal_id: &str, device_id: &str) -> Option<DeviceSession> {
        self.context.session(principal_id, device_id)
    }

    /// Number of devices seen.
    pub fn device_count(&self) -> usize {
        self.context.device_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_sync_protocol::{now_millis, ChangeOperation, WireChange};

    fn create(id: &str) -> WireChange {
        WireChange {
            entity_type: "note".into(),
            entity_id: id.into(),
            operation: ChangeOperation::Create.to_code(),
            payload: Some(vec![0x42]),
            local_id: Some(id.into()),
            remote_id: None,
            timestamp: now_millis(),
        }
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.revision(), 0);
        assert_eq!(server.record_count(), 0);
        assert_eq!(server.device_count(), 0);
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::new(ServerConfig::default());

        let response = server
            .handle_pull(PullRequest::new("alice", "phone", 0))
            .unwrap();
        assert!(response.updates.is_empty());

        let push = PushRequest::new("alice", "phone", vec![create("a"), create("b")], 0);
        let response = server.handle_push(push).unwrap();
        assert_eq!(response.successful.len(), 2);
        assert_eq!(server.revision(), 2);

        let response = server
            .handle_pull(PullRequest::new("alice", "laptop", 0))
            .unwrap();
        assert_eq!(response.updates.len(), 2);
        assert_eq!(server.device_count(), 2);
    }

    #[test]
    fn message_dispatch() {
        let server = SyncServer::new(ServerConfig::default());

        let message = SyncMessage::PullRequest(PullRequest::new("alice", "phone", 0));
        let response = server.handle_message(message).unwrap();
        assert!(matches!(response, SyncMessage::PullResponse(_)));

        let message = SyncMessage::PushResponse(PushResponse::default());
        assert!(server.handle_message(message).is_err());
    }

    #[test]
    fn post_routes_cbor_bodies() {
        let server = SyncServer::new(ServerConfig::default());

        let body = PushRequest::new("alice", "phone", vec![create("a")], 0)
            .encode()
            .unwrap();
        let reply = server.handle_post(PushRequest::ENDPOINT, &body).unwrap();
        let response = PushResponse::decode(&reply).unwrap();
        assert_eq!(response.successful.len(), 1);

        let body = PullRequest::new("alice", "laptop", 0).encode().unwrap();
        let reply = server.handle_post(PullRequest::ENDPOINT, &body).unwrap();
        assert_eq!(PullResponse::decode(&reply).unwrap().updates.len(), 1);
    }

    #[test]
    fn post_errors() {
        let server = SyncServer::new(ServerConfig::default());
        let err = server.handle_post("/sync/other", &[]).unwrap_err();
        assert!(err.contains("unknown endpoint"));

        let err = server
            .handle_post(PullRequest::ENDPOINT, &[0xff, 0x00])
            .unwrap_err();
        assert!(err.contains("codec"));
    }

    #[test]
    fn shared_store() {
        let store = Arc::new(RecordStore::new());
        let server = SyncServer::with_store(ServerConfig::default(), Arc::clone(&store));

        let push = PushRequest::new("alice", "phone", vec![create("a")], 0);
        server.handle_push(push).unwrap();

        assert_eq!(store.len(), 1);
    }
}
