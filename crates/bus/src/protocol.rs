//! The adapter ↔ broker command protocol.
//!
//! Every command travels as a [`Message`](crate::Message) envelope whose
//! topic is one of the constants below. The broker answers commands with a
//! [`Reply`] carrying the command's correlation id; deliveries are pushed
//! to consumers unsolicited under [`DELIVER`].

use serde::{Deserialize, Serialize};

/// Envelope topic for commands sent to the broker.
pub const COMMAND: &str = "bus.command";
/// Envelope topic for broker replies.
pub const REPLY: &str = "bus.reply";
/// Envelope topic for deliveries pushed to consumers.
pub const DELIVER: &str = "bus.deliver";

/// Commands a [`BusClient`](crate::BusClient) can issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Liveness probe; also used by `connect_until_successful`.
    Ping,
    /// Declare a topic exchange (idempotent).
    DeclareExchange { name: String },
    /// Declare a queue (idempotent); the reply carries the current depth.
    DeclareQueue { name: String },
    /// Bind a queue to an exchange under a routing pattern.
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    /// Publish a message; the reply is the delivery confirm.
    Publish {
        exchange: String,
        routing_key: String,
        body: serde_json::Value,
        mandatory: bool,
    },
    /// Register this connection as the consumer of `queue`.
    Consume { queue: String, prefetch: u32 },
    /// Acknowledge a delivery. Fire-and-forget.
    Ack { delivery_tag: u64 },
    /// Reject a delivery, optionally requeueing it at the front.
    /// Fire-and-forget.
    Nack { delivery_tag: u64, requeue: bool },
}

/// Broker replies, correlation-matched to their command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Pong,
    ExchangeDeclared,
    QueueDeclared { depth: u64 },
    Bound,
    /// The publish confirm: the message reached at least one queue (or the
    /// publish was not mandatory).
    Published,
    /// A mandatory publish matched no queue.
    NotDelivered,
    Consuming,
    Error { message: String },
}

/// A message pushed to a consumer. Must be acked or nacked by tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub body: serde_json::Value,
    pub redelivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_messagepack() {
        let cmd = Command::Publish {
            exchange: "raw_data".into(),
            routing_key: "monitor.system.chain_1".into(),
            body: serde_json::json!({"result": {"data": {}}}),
            mandatory: true,
        };
        let bytes = rmp_serde::to_vec(&cmd).unwrap();
        let back: Command = rmp_serde::from_slice(&bytes).unwrap();
        match back {
            Command::Publish {
                exchange, mandatory, ..
            } => {
                assert_eq!(exchange, "raw_data");
                assert!(mandatory);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn delivery_round_trips() {
        let delivery = Delivery {
            delivery_tag: 7,
            exchange: "alert".into(),
            routing_key: "alerter.system.chain_1".into(),
            queue: "system_alerter_input".into(),
            body: serde_json::json!({"severity": "WARNING"}),
            redelivered: true,
        };
        let bytes = rmp_serde::to_vec(&delivery).unwrap();
        let back: Delivery = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back.delivery_tag, 7);
        assert!(back.redelivered);
    }
}
