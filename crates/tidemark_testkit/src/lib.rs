//! # Tidemark Testkit
//!
//! Test utilities for Tidemark.
//!
//! This crate provides:
//! - A `Note` fixture entity and change builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use tidemark_testkit::prelude::*;
//! use tidemark_sync_protocol::SyncEntity;
//!
//! let n = NoteBuilder::new("n1").title("groceries").pinned().build();
//! assert_eq!(n.entity_id(), "n1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
