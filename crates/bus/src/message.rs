use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire-format envelope exchanged between adapters and the broker.
///
/// Envelopes are serialized with MessagePack for compact framing. The
/// `topic` identifies the protocol message type, while `correlation_id`
/// matches replies to the command that caused them. Application bodies
/// inside the payload (publish/deliver) stay UTF-8 JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Protocol topic (e.g. "bus.publish", "bus.deliver").
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "raw_bytes")]
    pub payload: Vec<u8>,

    /// When this envelope was created.
    pub timestamp: DateTime<Utc>,

    /// Matches a broker reply to its command.
    pub correlation_id: Uuid,
}

impl Message {
    /// Create a new envelope with a fresh correlation id.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(topic, payload, Uuid::new_v4())
    }

    /// Create an envelope carrying an explicit correlation id (replies).
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        let payload = rmp_serde::to_vec(payload)?;
        Ok(Self {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id,
        })
    }

    /// Deserialize an envelope from its MessagePack frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    /// Serialize the whole envelope into one MessagePack frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod raw_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
