//! CBOR-over-HTTP transport.
//!
//! Requests are posted to `{base_url}{path}` with a CBOR body. The HTTP
//! stack itself is injected through [`HttpClient`], so the same transport
//! runs over a real client in production and over [`LoopbackClient`] when
//! the server lives in the same process.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use tidemark_sync_protocol::{ProtocolResult, PullRequest, PullResponse, PushRequest, PushResponse};
use tracing::{debug, warn};

/// Minimal POST-only HTTP client.
pub trait HttpClient: Send + Sync {
    /// Posts `body` to `url` and returns the response body.
    ///
    /// Any error is treated as a network failure and may be retried.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Returns false if the client knows the network is unavailable.
    fn is_healthy(&self) -> bool;
}

/// A request message bound to its endpoint and response type.
pub trait Endpoint {
    /// Message the server answers with.
    type Response;

    /// Path appended to the base URL.
    const PATH: &'static str;

    /// Encodes the request body.
    fn encode_body(&self) -> ProtocolResult<Vec<u8>>;

    /// Decodes the response body.
    fn decode_response(bytes: &[u8]) -> ProtocolResult<Self::Response>;
}

impl Endpoint for PullRequest {
    type Response = PullResponse;
    const PATH: &'static str = PullRequest::ENDPOINT;

    fn encode_body(&self) -> ProtocolResult<Vec<u8>> {
        self.encode()
    }

    fn decode_response(bytes: &[u8]) -> ProtocolResult<PullResponse> {
        PullResponse::decode(bytes)
    }
}

impl Endpoint for PushRequest {
    type Response = PushResponse;
    const PATH: &'static str = PushRequest::ENDPOINT;

    fn encode_body(&self) -> ProtocolResult<Vec<u8>> {
        self.encode()
    }

    fn decode_response(bytes: &[u8]) -> ProtocolResult<PushResponse> {
        PushResponse::decode(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Up,
    Down,
    Closed,
}

#[derive(Debug)]
struct LinkState {
    link: Link,
    last_error: Option<String>,
}

/// Sync transport that posts CBOR bodies through an [`HttpClient`].
///
/// A failed request marks the link down but does not block the next one;
/// the first successful request brings it back up. After
/// [`SyncTransport::close`] every request fails with
/// [`SyncError::NotConnected`] until [`reconnect`](Self::reconnect).
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    state: Mutex<LinkState>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            state: Mutex::new(LinkState {
                link: Link::Up,
                last_error: None,
            }),
        }
    }

    /// Server base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Message of the last failed request, cleared by a successful one.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Reopens a closed transport.
    pub fn reconnect(&self) {
        let mut state = self.state.lock();
        state.link = Link::Up;
        state.last_error = None;
    }

    fn send<R: Endpoint>(&self, request: &R) -> SyncResult<R::Response> {
        if self.state.lock().link == Link::Closed {
            return Err(SyncError::NotConnected);
        }

        let body = request
            .encode_body()
            .map_err(|e| SyncError::Protocol(format!("request encoding failed: {}", e)))?;
        let url = format!("{}{}", self.base_url, R::PATH);
        debug!(%url, bytes = body.len(), "posting sync request");

        let reply = self.client.post(&url, body);
        let bytes = {
            let mut state = self.state.lock();
            match reply {
                Ok(bytes) => {
                    if state.link == Link::Down {
                        debug!(%url, "sync server reachable again");
                    }
                    if state.link != Link::Closed {
                        state.link = Link::Up;
                    }
                    state.last_error = None;
                    bytes
                }
                Err(message) => {
                    warn!(%url, error = %message, "sync request failed");
                    if state.link != Link::Closed {
                        state.link = Link::Down;
                    }
                    state.last_error = Some(message.clone());
                    return Err(SyncError::transport_retryable(message));
                }
            }
        };

        R::decode_response(&bytes)
            .map_err(|e| SyncError::Protocol(format!("malformed response: {}", e)))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.send(request)
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.send(request)
    }

    fn is_connected(&self) -> bool {
        self.state.lock().link == Link::Up && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.state.lock().link = Link::Closed;
        Ok(())
    }
}

/// A server reachable without a network.
pub trait LoopbackServer {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// [`HttpClient`] that hands bodies straight to an in-process server.
///
/// The scheme and host of the URL are ignored; only the path is passed to
/// the server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Wraps a server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let host_start = url.find("://").map_or(0, |i| i + 3);
        let path = url[host_start..]
            .find('/')
            .map_or("/", |i| &url[host_start + i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Answers every post with a fixed body, or refuses when none is set.
    #[derive(Default)]
    struct CannedHttp {
        reply: Mutex<Option<Vec<u8>>>,
        offline: AtomicBool,
        posted: Mutex<Vec<String>>,
    }

    impl CannedHttp {
        fn replying(bytes: Vec<u8>) -> Self {
            let http = Self::default();
            *http.reply.lock() = Some(bytes);
            http
        }
    }

    impl HttpClient for &CannedHttp {
        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.posted.lock().push(url.to_string());
            self.reply
                .lock()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }

        fn is_healthy(&self) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }
    }

    const URL: &str = "https://sync.example.com/";

    fn pull() -> PullRequest {
        PullRequest::new("alice", "phone", 0)
    }

    #[test]
    fn pull_posts_to_endpoint() {
        let http = CannedHttp::replying(PullResponse::new(vec![], 42).encode().unwrap());
        let transport = HttpTransport::new(URL, &http);

        assert_eq!(transport.base_url(), "https://sync.example.com");
        assert_eq!(transport.pull(&pull()).unwrap().new_watermark, 42);
        assert_eq!(
            *http.posted.lock(),
            vec!["https://sync.example.com/sync/pull".to_string()]
        );
    }

    #[test]
    fn failed_post_is_retryable_and_recovers() {
        let http = CannedHttp::default();
        let transport = HttpTransport::new(URL, &http);
        let push = PushRequest::new("alice", "phone", vec![], 0);

        let err = transport.push(&push).unwrap_err();
        assert!(err.is_retryable());
        assert!(!transport.is_connected());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));

        *http.reply.lock() = Some(PushResponse::default().encode().unwrap());
        assert!(transport.push(&push).is_ok());
        assert!(transport.is_connected());
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn closed_transport_refuses_until_reconnected() {
        let http = CannedHttp::replying(PullResponse::new(vec![], 1).encode().unwrap());
        let transport = HttpTransport::new(URL, &http);

        transport.close().unwrap();
        assert!(matches!(transport.pull(&pull()), Err(SyncError::NotConnected)));
        assert!(http.posted.lock().is_empty());

        transport.reconnect();
        assert!(transport.is_connected());
        assert!(transport.pull(&pull()).is_ok());
    }

    #[test]
    fn unhealthy_client_reports_disconnected() {
        let http = CannedHttp::default();
        http.offline.store(true, Ordering::SeqCst);
        assert!(!HttpTransport::new(URL, &http).is_connected());
    }

    #[test]
    fn garbage_response_is_protocol_error() {
        let http = CannedHttp::replying(vec![0xff, 0xff]);
        let transport = HttpTransport::new(URL, &http);

        let err = transport.pull(&pull()).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn loopback_strips_host() {
        struct Echo;
        impl LoopbackServer for Echo {
            fn handle_post(&self, path: &str, _body: &[u8]) -> Result<Vec<u8>, String> {
                Ok(path.as_bytes().to_vec())
            }
        }

        let client = LoopbackClient::new(Echo);
        let reply = client.post("loopback://sync/sync/push", Vec::new()).unwrap();
        assert_eq!(reply, b"/sync/push".to_vec());
        let reply = client.post("loopback://host", Vec::new()).unwrap();
        assert_eq!(reply, b"/".to_vec());
    }
}
