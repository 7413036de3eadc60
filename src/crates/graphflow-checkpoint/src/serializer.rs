//! Byte encodings for stored snapshots
//!
//! A store never interprets the runtime-state document it keeps; it only needs to turn a
//! [`Snapshot`](crate::Snapshot) envelope into bytes and back. JSON keeps stored entries
//! human-readable, bincode keeps them compact.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for encoding snapshot envelopes
pub trait SerializerProtocol: Send + Sync {
    /// Encode a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Short name recorded next to stored entries
    fn name(&self) -> &'static str;
}

/// JSON encoding (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Binary encoding using bincode
///
/// Only suitable for types with a fixed shape. The snapshot envelope qualifies because the
/// runtime-state document travels inside it as an opaque string.
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
