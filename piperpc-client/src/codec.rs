//! Message serialization.
//!
//! Payload frames carry opaque bytes; turning them into typed messages is
//! the job of a [`MessageEncoder`] / [`MessageDecoder`]. [`Encoding`]
//! implements both for protobuf (via `prost`) and JSON (via `serde_json`).

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ClientError;

/// Serializes request messages.
pub trait MessageEncoder<T>: Send + Sync {
    /// Serialize `message` into a payload.
    fn encode(&self, message: &T) -> Result<Bytes, ClientError>;
}

/// Deserializes response messages.
pub trait MessageDecoder<T>: Send + Sync {
    /// Deserialize one payload.
    fn decode(&self, buf: &[u8]) -> Result<T, ClientError>;
}

/// Wire encoding of messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Protobuf binary encoding.
    #[default]
    Proto,
    /// JSON encoding.
    Json,
}

impl Encoding {
    /// Whether this is the protobuf encoding.
    pub fn is_proto(self) -> bool {
        self == Encoding::Proto
    }
}

impl<T> MessageEncoder<T> for Encoding
where
    T: Message + Serialize,
{
    fn encode(&self, message: &T) -> Result<Bytes, ClientError> {
        match self {
            Encoding::Proto => Ok(Bytes::from(message.encode_to_vec())),
            Encoding::Json => serde_json::to_vec(message)
                .map(Bytes::from)
                .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e))),
        }
    }
}

impl<T> MessageDecoder<T> for Encoding
where
    T: Message + DeserializeOwned + Default,
{
    fn decode(&self, buf: &[u8]) -> Result<T, ClientError> {
        match self {
            Encoding::Proto => T::decode(buf)
                .map_err(|e| ClientError::Decode(format!("protobuf decoding failed: {}", e))),
            Encoding::Json => serde_json::from_slice(buf)
                .map_err(|e| ClientError::Decode(format!("JSON decoding failed: {}", e))),
        }
    }
}
