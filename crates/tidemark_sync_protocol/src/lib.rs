//! # Tidemark Sync Protocol
//!
//! Change-tracking model and wire messages for Tidemark sync.
//!
//! This crate provides:
//! - `PendingChange` for not-yet-synchronized local mutations
//! - `SyncConflict` and `ConflictType` for conflict classification
//! - `PushResult` / `PullResult` returned by a remote sync client
//! - `EntitySerializer` with CBOR and JSON implementations
//! - Protocol messages (Pull, Push) and their CBOR codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;
mod operation;
mod results;
mod serializer;

pub use conflict::{ConflictType, SyncConflict};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    PullRequest, PullResponse, PushAck, PushFailure, PushRequest, PushResponse, SyncMessage,
    WireChange, WireConflict, WireUpdate,
};
pub use operation::{now_millis, ChangeOperation, LogicalTime, PendingChange, SyncEntity};
pub use results::{PullResult, PushResult, RemoteUpdate};
pub use serializer::{CborSerializer, EntitySerializer, JsonSerializer};

/// Current version of the wire protocol.
pub const PROTOCOL_VERSION: u16 = 1;
