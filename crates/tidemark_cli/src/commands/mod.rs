//! CLI command implementations.

pub mod decode;
pub mod simulate;

use clap::ValueEnum;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// How a device resolves the conflict raised by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolveStrategy {
    /// Keep the device's own edit.
    Local,
    /// Accept the version received from the server.
    Remote,
    /// Combine both titles into a new version.
    Merge,
    /// Delete the note everywhere.
    Delete,
}

/// Protocol message kinds accepted by `decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageKind {
    /// Pull request.
    PullRequest,
    /// Pull response.
    PullResponse,
    /// Push request.
    PushRequest,
    /// Push response.
    PushResponse,
}
