//! Entity payload serializers.
//!
//! The wire carries entities as opaque byte payloads. Which encoding is used
//! is decided by the injected [`EntitySerializer`], so the orchestration
//! logic never depends on a concrete format.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts a domain entity to and from an opaque byte payload.
pub trait EntitySerializer<T>: Send + Sync {
    /// Encodes an entity.
    fn encode(&self, entity: &T) -> ProtocolResult<Vec<u8>>;

    /// Decodes an entity.
    fn decode(&self, bytes: &[u8]) -> ProtocolResult<T>;

    /// MIME-like name of the payload encoding.
    fn content_type(&self) -> &'static str;
}

/// CBOR payloads via `ciborium`.
pub struct CborSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborSerializer<T> {
    /// Creates a CBOR serializer.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntitySerializer<T> for CborSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, entity: &T) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(entity, &mut buf)
            .map_err(|e| ProtocolError::encoding(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<T> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/cbor"
    }
}

/// JSON payloads via `serde_json`.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Creates a JSON serializer.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntitySerializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, entity: &T) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(entity).map_err(|e| ProtocolError::encoding(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<T> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
