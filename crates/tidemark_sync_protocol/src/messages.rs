//! Protocol messages for sync.
//!
//! Messages are CBOR maps with named fields. Entity payloads travel as CBOR
//! byte strings produced by an `EntitySerializer`.

use crate::error::{ProtocolError, ProtocolResult};
use crate::PROTOCOL_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

fn to_cbor<M: Serialize>(message: &M) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<M: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<M> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
}

/// Serde adapter that writes `Option<Vec<u8>>` as a CBOR byte string.
mod opt_bytes {
    use serde::de::{self, Deserializer, SeqAccess, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_bytes(bytes),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        d.deserialize_option(OptionVisitor)
    }

    struct OptionVisitor;

    impl<'de> Visitor<'de> for OptionVisitor {
        type Value = Option<Vec<u8>>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an optional byte string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_byte_buf(BytesVisitor).map(Some)
        }
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        // Accept arrays of small integers from encoders without byte strings.
        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Pull request.
    PullRequest(PullRequest),
    /// Pull response.
    PullResponse(PullResponse),
    /// Push request.
    PushRequest(PushRequest),
    /// Push response.
    PushResponse(PushResponse),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::PullRequest(_) => 1,
            SyncMessage::PullResponse(_) => 2,
            SyncMessage::PushRequest(_) => 3,
            SyncMessage::PushResponse(_) => 4,
        }
    }

    /// HTTP path the message is exchanged on.
    pub fn endpoint(&self) -> &'static str {
        match self {
            SyncMessage::PullRequest(_) | SyncMessage::PullResponse(_) => PullRequest::ENDPOINT,
            SyncMessage::PushRequest(_) | SyncMessage::PushResponse(_) => PushRequest::ENDPOINT,
        }
    }
}

/// One local change as sent to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    /// Entity type name.
    pub entity_type: String,
    /// Logical entity identifier.
    pub entity_id: String,
    /// `ChangeOperation` code.
    pub operation: u8,
    /// Serialized entity (absent for pure deletes).
    #[serde(default, with = "opt_bytes")]
    pub payload: Option<Vec<u8>>,
    /// Local-only identifier.
    #[serde(default)]
    pub local_id: Option<String>,
    /// Remote identifier.
    #[serde(default)]
    pub remote_id: Option<String>,
    /// Time of the local mutation.
    pub timestamp: u64,
}

/// Push request from client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Principal (user/account) the changes belong to.
    pub principal_id: String,
    /// Stable device identifier, for idempotency and audit.
    pub device_id: String,
    /// Protocol version.
    #[serde(default = "default_version")]
    pub protocol_version: u16,
    /// Changes in queue order.
    pub changes: Vec<WireChange>,
    /// Client wall-clock time when the request was built.
    pub client_time: u64,
}

fn default_version() -> u16 {
    PROTOCOL_VERSION
}

impl PushRequest {
    /// HTTP path for push.
    pub const ENDPOINT: &'static str = "/sync/push";

    /// Creates a new push request.
    pub fn new(
        principal_id: impl Into<String>,
        device_id: impl Into<String>,
        changes: Vec<WireChange>,
        client_time: u64,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            device_id: device_id.into(),
            protocol_version: PROTOCOL_VERSION,
            changes,
            client_time,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Acknowledgement of one accepted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushAck {
    /// Position of the change in the request.
    pub index: u32,
    /// Remote identifier assigned or confirmed by the remote.
    #[serde(default)]
    pub remote_id: Option<String>,
}

/// A change the remote could not apply (validation, transient error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFailure {
    /// Position of the change in the request.
    pub index: u32,
    /// Why the change was not applied.
    pub reason: String,
}

/// A conflict as reported by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireConflict {
    /// Position of the conflicting change in a push request, if any.
    #[serde(default)]
    pub index: Option<u32>,
    /// Logical entity identifier.
    pub entity_id: String,
    /// `ConflictType` code.
    pub conflict_type: u8,
    /// Local payload as seen by the remote.
    #[serde(default, with = "opt_bytes")]
    pub local_payload: Option<Vec<u8>>,
    /// Current remote payload.
    #[serde(default, with = "opt_bytes")]
    pub remote_payload: Option<Vec<u8>>,
    /// Detection time.
    pub timestamp: u64,
}

/// Push response from server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushResponse {
    /// Accepted changes.
    #[serde(default)]
    pub successful: Vec<PushAck>,
    /// Changes that failed and may be retried.
    #[serde(default)]
    pub failed: Vec<PushFailure>,
    /// Conflicting changes.
    #[serde(default)]
    pub conflicts: Vec<WireConflict>,
}

impl PushResponse {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }

    /// A response accepting every change of a request of `count` changes.
    pub fn accept_all(count: u32) -> Self {
        Self {
            successful: (0..count)
                .map(|index| PushAck {
                    index,
                    remote_id: None,
                })
                .collect(),
            ..Self::default()
        }
    }
}

/// Pull request from client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Principal whose entities are pulled.
    pub principal_id: String,
    /// Stable device identifier.
    pub device_id: String,
    /// Protocol version.
    #[serde(default = "default_version")]
    pub protocol_version: u16,
    /// Exclusive lower bound of the pull window.
    pub since_watermark: u64,
}

impl PullRequest {
    /// HTTP path for pull.
    pub const ENDPOINT: &'static str = "/sync/pull";

    /// Creates a new pull request.
    pub fn new(
        principal_id: impl Into<String>,
        device_id: impl Into<String>,
        since_watermark: u64,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            device_id: device_id.into(),
            protocol_version: PROTOCOL_VERSION,
            since_watermark,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// One remote change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUpdate {
    /// Entity type name.
    pub entity_type: String,
    /// Logical entity identifier.
    pub entity_id: String,
    /// Serialized entity; absent when the remote deleted it.
    #[serde(default, with = "opt_bytes")]
    pub payload: Option<Vec<u8>>,
    /// When the remote recorded the change.
    pub timestamp: u64,
}

/// Pull response from server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Remote changes after the requested watermark.
    #[serde(default)]
    pub updates: Vec<WireUpdate>,
    /// Conflicts the remote chose to report.
    #[serde(default)]
    pub conflicts: Vec<WireConflict>,
    /// Watermark to continue from.
    pub new_watermark: u64,
}

impl PullResponse {
    /// Creates a new pull response.
    pub fn new(updates: Vec<WireUpdate>, new_watermark: u64) -> Self {
        Self {
            updates,
            conflicts: Vec::new(),
            new_watermark,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(operation: u8, payload: Option<Vec<u8>>) -> WireChange {
        WireChange {
            entity_type: "note".into(),
            entity_id: "e1".into(),
            operation,
            payload,
            local_id: Some("e1".into()),
            remote_id: None,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn push_request_carries_device_and_time() {
        let req = PushRequest::new(
            "alice",
            "device-1",
            vec![change(1, Some(vec![1, 2, 3])), change(3, None)],
            99,
        );
        let decoded = PushRequest::decode(&req.encode().unwrap()).unwrap();

        assert_eq!(decoded.principal_id, "alice");
        assert_eq!(decoded.device_id, "device-1");
        assert_eq!(decoded.client_time, 99);
        assert_eq!(decoded.changes[0].payload, Some(vec![1, 2, 3]));
        assert_eq!(decoded.changes[1].payload, None);
    }

    #[test]
    fn payload_is_a_cbor_byte_string() {
        let bytes = to_cbor(&change(2, Some(vec![0xAA; 4]))).unwrap();
        // major type 2 (byte string) of length 4 followed by the bytes
        let needle = [0x44, 0xAA, 0xAA, 0xAA, 0xAA];
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn pull_response_with_delete_update() {
        let mut resp = PullResponse::new(
            vec![WireUpdate {
                entity_type: "note".into(),
                entity_id: "e2".into(),
                payload: None,
                timestamp: 5,
            }],
            12,
        );
        resp.conflicts.push(WireConflict {
            index: None,
            entity_id: "e3".into(),
            conflict_type: 1,
            local_payload: Some(vec![1]),
            remote_payload: Some(vec![2]),
            timestamp: 6,
        });

        let decoded = PullResponse::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn missing_optional_fields_default() {
        #[derive(Serialize)]
        struct Minimal {
            new_watermark: u64,
        }
        let bytes = to_cbor(&Minimal { new_watermark: 3 }).unwrap();
        let decoded = PullResponse::decode(&bytes).unwrap();
        assert!(decoded.updates.is_empty());
        assert!(decoded.conflicts.is_empty());
        assert_eq!(decoded.new_watermark, 3);
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        assert!(PushResponse::decode(&[0x01, 0x02]).is_err());
        assert!(PullRequest::decode(b"").is_err());
    }

    #[test]
    fn accept_all_indexes_every_change() {
        let resp = PushResponse::accept_all(3);
        let indexes: Vec<u32> = resp.successful.iter().map(|a| a.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn sync_message_type_codes() {
        assert_eq!(
            SyncMessage::PullRequest(PullRequest::new("p", "d", 0)).type_code(),
            1
        );
        assert_eq!(
            SyncMessage::PullResponse(PullResponse::new(vec![], 0)).type_code(),
            2
        );
        assert_eq!(
            SyncMessage::PushRequest(PushRequest::new("p", "d", vec![], 0)).type_code(),
            3
        );
        assert_eq!(
            SyncMessage::PushResponse(PushResponse::default()).endpoint(),
            "/sync/push"
        );
    }
}
