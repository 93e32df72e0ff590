//! # Tidemark Sync Engine
//!
//! Offline-first sync orchestration for Tidemark.
//!
//! This crate provides:
//! - `RemoteSyncClient` with a protocol implementation over any transport
//! - Local store and pending-change queue interfaces with in-memory versions
//! - `ConflictRegistry` for conflicts awaiting resolution
//! - `RepositorySyncOrchestrator`, the pull-then-push cycle driver
//! - Retry with exponential backoff
//! - HTTP transport abstraction and an in-process loopback client
//!
//! ## Architecture
//!
//! A cycle pulls first and pushes second:
//! 1. Pull remote changes since the watermark
//! 2. Apply them locally, or flag a conflict where a pending change exists
//! 3. Push pending changes that are not held back by an open conflict
//!
//! ## Key Invariants
//!
//! - The watermark never moves backwards and only advances after a pull
//! - A pending change leaves the queue only when accepted or conflicted
//! - Conflicts are never auto-resolved
//! - One cycle at a time per orchestrator

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod http;
mod orchestrator;
mod queue;
mod registry;
mod store;
mod transport;

pub use client::{NullSyncClient, ProtocolSyncClient, RemoteSyncClient};
pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{Endpoint, HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use orchestrator::{
    RepositorySyncOrchestrator, Resolution, SyncOutcome, SyncReport, SyncState, SyncStats,
};
pub use queue::{MemoryPendingQueue, PendingChangeStore};
pub use registry::ConflictRegistry;
pub use store::{LocalStore, MemoryLocalStore};
pub use transport::{MockTransport, SyncTransport};
