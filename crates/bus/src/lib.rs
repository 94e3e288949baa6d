//! lookout-bus — the message bus gluing the pipeline stages together.
//!
//! A standalone broker process ([`broker::BusBroker`]) owns the queue and
//! binding tables; every worker talks to it through its own [`BusClient`]
//! adapter over a dedicated DEALER socket. The adapter offers the
//! topic-exchange operations the pipeline is written against: declare,
//! bind, publish-with-confirm, consume-with-ack, and a pacing sleep.

pub mod broker;
pub mod client;
pub mod envelopes;
pub mod error;
pub mod message;
pub mod protocol;
pub mod topic;
pub mod transport;
pub mod worker;

pub use broker::{BrokerConfig, BusBroker};
pub use client::{BusClient, Delivery};
pub use envelopes::{
    exchanges, routing, ConfigDocument, ManagerHeartbeat, MetaData, RawError, RawMessage,
    RawResult, SavePayload, TransformedError, TransformedMessage, TransformedMeta,
    TransformedResult, ValueDelta, WorkerHeartbeat,
};
pub use error::BusError;
pub use message::Message;
pub use topic::topic_matches;
pub use transport::Transport;
pub use worker::{run_with_restarts, shutdown_signal, BusWorker, RESTART_PERIOD};
