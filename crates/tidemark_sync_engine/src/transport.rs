//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tidemark_sync_protocol::{PullRequest, PullResponse, PushAck, PushRequest, PushResponse};

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, WebSocket, in-process, mock for testing, etc.).
pub trait SyncTransport: Send + Sync {
    /// Pulls changes from the server.
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Pushes changes to the server.
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

#[derive(Debug, Clone)]
enum PushBehavior {
    Unset,
    Respond(PushResponse),
    AcceptAll,
    Fail(SyncError),
}

#[derive(Debug, Clone)]
enum PullBehavior {
    Unset,
    Respond(PullResponse),
    Fail(SyncError),
}

/// A mock transport for testing.
///
/// Responses are sticky: the last configured response is returned for every
/// call until replaced. All requests are recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    pull_behavior: Mutex<PullBehavior>,
    push_behavior: Mutex<PushBehavior>,
    pull_requests: Mutex<Vec<PullRequest>>,
    push_requests: Mutex<Vec<PushRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            pull_behavior: Mutex::new(PullBehavior::Unset),
            push_behavior: Mutex::new(PushBehavior::Unset),
            pull_requests: Mutex::new(Vec::new()),
            push_requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_behavior.lock() = PullBehavior::Respond(response);
    }

    /// Makes every pull fail with the given error.
    pub fn fail_pulls(&self, error: SyncError) {
        *self.pull_behavior.lock() = PullBehavior::Fail(error);
    }

    /// Sets the push response.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_behavior.lock() = PushBehavior::Respond(response);
    }

    /// Accepts every pushed change, assigning `remote-<entity_id>` ids.
    pub fn accept_all_pushes(&self) {
        *self.push_behavior.lock() = PushBehavior::AcceptAll;
    }

    /// Makes every push fail with the given error.
    pub fn fail_pushes(&self, error: SyncError) {
        *self.push_behavior.lock() = PushBehavior::Fail(error);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Pull requests received so far.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_requests.lock().clone()
    }

    /// Push requests received so far.
    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.push_requests.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pull_requests.lock().push(request.clone());
        match &*self.pull_behavior.lock() {
            PullBehavior::Respond(response) => Ok(response.clone()),
            PullBehavior::Fail(error) => Err(error.clone()),
            PullBehavior::Unset => Err(SyncError::Protocol("No mock pull response set".into())),
        }
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.push_requests.lock().push(request.clone());
        match &*self.push_behavior.lock() {
            PushBehavior::Respond(response) => Ok(response.clone()),
            PushBehavior::AcceptAll => Ok(PushResponse {
                successful: request
                    .changes
                    .iter()
                    .enumerate()
                    .map(|(index, change)| PushAck {
                        index: index as u32,
                        remote_id: Some(
                            change
                                .remote_id
                                .clone()
                                .unwrap_or_else(|| format!("remote-{}", change.entity_id)),
                        ),
                    })
                    .collect(),
                ..PushResponse::default()
            }),
            PushBehavior::Fail(error) => Err(error.clone()),
            PushBehavior::Unset => Err(SyncError::Protocol("No mock push response set".into())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
