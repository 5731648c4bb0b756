use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::errors::QueueError;

/// String serialization for stored records.
///
/// Implementations must be stable: `decode(encode(v))` returns a value equal
/// to `v`. The queue is constructed with two codec instances, one for the
/// timed payload and one for the state record, so embedders can swap either
/// wire format independently.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<String, QueueError>;
    fn decode(&self, raw: &str) -> Result<T, QueueError>;
}

/// The default JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String, QueueError> {
        serde_json::to_string(value).map_err(QueueError::Encode)
    }

    fn decode(&self, raw: &str) -> Result<T, QueueError> {
        serde_json::from_str(raw).map_err(QueueError::Decode)
    }
}
