//! The stable error-code taxonomy shared across the wire.
//!
//! Alerters branch on `code`, never on `message`, so the integer values are
//! a contract and must not be renumbered.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Wire-stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// HTTP/RPC connection failure, timeout or malformed page.
    CannotAccessSource,
    /// The source answered but the reading could not be taken.
    DataReading,
    /// The source answered with undecodable JSON.
    JsonDecode,
    /// An expected metric was absent from a scrape.
    MetricNotFound,
    /// A message did not match any known envelope shape.
    ReceivedUnexpectedData,
    /// Sub-records of one alerts config carried different parent ids.
    ParentIdMismatch,
    /// A mandatory publish matched no queue.
    MessageWasNotDelivered,
    /// The contracts catalog could not be retrieved.
    CouldNotRetrieveContracts,
    /// No connected, synced RPC source was available.
    NoSyncedSource,
    /// Dedicated downtime code consumed by the alerter's downtime rule.
    NodeIsDown,
    /// A component was constructed with zero data sources.
    NotEnoughDataSources,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::CannotAccessSource => 5000,
            ErrorCode::DataReading => 5001,
            ErrorCode::JsonDecode => 5002,
            ErrorCode::MetricNotFound => 5003,
            ErrorCode::ReceivedUnexpectedData => 5004,
            ErrorCode::ParentIdMismatch => 5005,
            ErrorCode::MessageWasNotDelivered => 5006,
            ErrorCode::CouldNotRetrieveContracts => 5007,
            ErrorCode::NoSyncedSource => 5008,
            ErrorCode::NodeIsDown => 5009,
            ErrorCode::NotEnoughDataSources => 5010,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let all = [
            ErrorCode::CannotAccessSource,
            ErrorCode::DataReading,
            ErrorCode::JsonDecode,
            ErrorCode::MetricNotFound,
            ErrorCode::ReceivedUnexpectedData,
            ErrorCode::ParentIdMismatch,
            ErrorCode::MessageWasNotDelivered,
            ErrorCode::CouldNotRetrieveContracts,
            ErrorCode::NoSyncedSource,
            ErrorCode::NodeIsDown,
            ErrorCode::NotEnoughDataSources,
        ];
        all.into_iter().find(|c| c.code() == code)
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u16::deserialize(deserializer)?;
        ErrorCode::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown error code {code}")))
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// An error observed while monitoring, as carried in error envelopes.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct MonitoringError {
    pub code: ErrorCode,
    pub message: String,
}

impl MonitoringError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cannot_access(source: &str) -> Self {
        Self::new(
            ErrorCode::CannotAccessSource,
            format!("could not access {source}"),
        )
    }

    pub fn node_is_down(name: &str) -> Self {
        Self::new(ErrorCode::NodeIsDown, format!("{name} is down"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::CannotAccessSource.code(), 5000);
        assert_eq!(ErrorCode::ParentIdMismatch.code(), 5005);
        assert_eq!(ErrorCode::NodeIsDown.code(), 5009);
    }

    #[test]
    fn from_code_round_trips_every_variant() {
        for code in 5000..=5010u16 {
            let parsed = ErrorCode::from_code(code).unwrap();
            assert_eq!(parsed.code(), code);
        }
        assert!(ErrorCode::from_code(4999).is_none());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let err = MonitoringError::node_is_down("node_1");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 5009);
        let back: MonitoringError = serde_json::from_value(json).unwrap();
        assert_eq!(back.code, ErrorCode::NodeIsDown);
    }
}
