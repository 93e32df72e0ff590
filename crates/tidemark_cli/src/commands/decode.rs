//! Decode command implementation.

use super::MessageKind;
use std::path::Path;
use tidemark_sync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse, SyncMessage};

/// Runs the decode command.
pub fn run(kind: MessageKind, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let message = decode(kind, &bytes)?;
    println!("{}", to_json(&message)?);
    Ok(())
}

fn decode(kind: MessageKind, bytes: &[u8]) -> Result<SyncMessage, Box<dyn std::error::Error>> {
    let message = match kind {
        MessageKind::PullRequest => SyncMessage::PullRequest(PullRequest::decode(bytes)?),
        MessageKind::PullResponse => SyncMessage::PullResponse(PullResponse::decode(bytes)?),
        MessageKind::PushRequest => SyncMessage::PushRequest(PushRequest::decode(bytes)?),
        MessageKind::PushResponse => SyncMessage::PushResponse(PushResponse::decode(bytes)?),
    };
    Ok(message)
}

fn to_json(message: &SyncMessage) -> serde_json::Result<String> {
    match message {
        SyncMessage::PullRequest(m) => serde_json::to_string_pretty(m),
        SyncMessage::PullResponse(m) => serde_json::to_string_pretty(m),
        SyncMessage::PushRequest(m) => serde_json::to_string_pretty(m),
        SyncMessage::PushResponse(m) => serde_json::to_string_pretty(m),
    }
}
