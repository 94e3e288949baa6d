use thiserror::Error;

use lookout_core::{ErrorCode, MonitoringError};

/// Errors raised while taking a reading.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Bus(#[from] lookout_bus::BusError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("evm error: {0}")]
    Evm(String),

    #[error(transparent)]
    Source(#[from] MonitoringError),

    #[error("monitor '{monitor}' was not given enough data sources: {field}")]
    NotEnoughSources { monitor: String, field: String },
}

impl MonitorError {
    /// Map this failure onto the wire error taxonomy, when it has a
    /// source-facing meaning.
    pub fn as_wire_error(&self, source: &str) -> MonitoringError {
        match self {
            MonitorError::Http(e) if e.is_connect() || e.is_timeout() => {
                MonitoringError::new(ErrorCode::NodeIsDown, format!("{source} is down"))
            }
            MonitorError::Http(e) if e.is_decode() => {
                MonitoringError::new(ErrorCode::JsonDecode, format!("undecodable data from {source}"))
            }
            MonitorError::Http(_) => MonitoringError::cannot_access(source),
            MonitorError::Evm(e) => {
                MonitoringError::new(ErrorCode::DataReading, format!("{source}: {e}"))
            }
            MonitorError::Source(e) => e.clone(),
            MonitorError::Bus(_) | MonitorError::NotEnoughSources { .. } => {
                MonitoringError::new(ErrorCode::DataReading, self.to_string())
            }
        }
    }
}

impl From<alloy::contract::Error> for MonitorError {
    fn from(e: alloy::contract::Error) -> Self {
        MonitorError::Evm(e.to_string())
    }
}

impl From<alloy::transports::TransportError> for MonitorError {
    fn from(e: alloy::transports::TransportError) -> Self {
        MonitorError::Evm(e.to_string())
    }
}
