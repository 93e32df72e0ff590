//! # Tidemark Sync Server
//!
//! Reference in-memory sync server for Tidemark.
//!
//! This crate provides:
//! - Pull and push handlers speaking the Tidemark wire protocol
//! - An authoritative per-principal record store with tombstones
//! - Push validation and conflict detection
//! - CBOR request routing for in-process (loopback) transports
//!
//! # Conflict rules
//!
//! Changes of one push are handled in request order:
//! - Create of a live entity is a `DuplicateCreation`, unless the same
//!   device replays an identical create
//! - Update or Delete from another device whose record changed after the
//!   change's timestamp is `BothModified`, `LocalModifiedRemoteDeleted`
//!   (remote tombstone) or `LocalDeletedRemoteModified`
//! - Create or Update without a payload and Update of an unknown entity
//!   are rejected
//! - Deleting an unknown or deleted entity succeeds

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{DeviceSession, HandlerContext, RequestHandler};
pub use server::SyncServer;
pub use store::{Record, RecordKey, RecordStore};
