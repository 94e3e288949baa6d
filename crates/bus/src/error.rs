use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the lookout messaging layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("broker did not reply within {0:?}")]
    Timeout(Duration),

    #[error("message to exchange '{exchange}' with routing key '{routing_key}' was not delivered to any queue")]
    NotDelivered {
        exchange: String,
        routing_key: String,
    },

    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Whether the error invalidates the whole connection (the worker's
    /// outer restart loop handles it) rather than a single operation.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BusError::Zmq(_) | BusError::Transport(_) | BusError::Io(_)
        )
    }
}
