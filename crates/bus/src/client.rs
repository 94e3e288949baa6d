//! The broker adapter owned by every worker.
//!
//! A [`BusClient`] wraps one DEALER socket whose I/O runs on a background
//! task, so the connection stays serviced while the owning worker computes
//! or sleeps. One adapter instance belongs to exactly one logical thread of
//! control; workers that publish heartbeats from a second loop own a second
//! adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

use crate::error::BusError;
use crate::message::Message;
use crate::protocol::{Command, Reply, COMMAND, DELIVER};
use crate::transport::Transport;

pub use crate::protocol::Delivery;

/// Default wait for a broker reply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Probe timeout used while establishing the connection.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Reconnect backoff bounds.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(32);
/// Buffered deliveries between the event loop and `next_delivery`.
const DELIVERY_BUFFER: usize = 1024;

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Reply>>>>;

/// A connected broker adapter.
pub struct BusClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: PendingMap,
    deliveries: Mutex<mpsc::Receiver<Delivery>>,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl BusClient {
    /// Connect and verify the broker answers a ping. Retries with bounded
    /// exponential backoff until it succeeds; idempotent.
    pub async fn connect_until_successful(transport: &Transport) -> Self {
        let mut backoff = BACKOFF_BASE;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match Self::connect(transport).await {
                Ok(client) => match client.ping(PROBE_TIMEOUT).await {
                    Ok(()) => {
                        info!(endpoint = %transport, attempt, "connected to broker");
                        return client;
                    }
                    Err(e) => {
                        debug!(endpoint = %transport, attempt, error = %e, "broker probe failed");
                    }
                },
                Err(e) => {
                    debug!(endpoint = %transport, attempt, error = %e, "broker connect failed");
                }
            }
            warn!(
                endpoint = %transport,
                attempt,
                retry_in = ?backoff,
                "broker not reachable yet"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    /// Connect a DEALER socket and start the background event loop.
    pub async fn connect(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = DealerSocket::new();
        socket.connect(&transport.endpoint()).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(256);
        let (delivery_tx, delivery_rx) = mpsc::channel::<Delivery>(DELIVERY_BUFFER);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending, delivery_tx).await;
        });

        Ok(Self {
            send_tx,
            pending,
            deliveries: Mutex::new(delivery_rx),
            _loop_handle: loop_handle,
        })
    }

    /// Single task owning the DEALER socket: multiplexes outbound commands
    /// and inbound replies/deliveries without mutex contention.
    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: PendingMap,
        delivery_tx: mpsc::Sender<Delivery>,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => {
                            Self::dispatch_inbound(&pending, &delivery_tx, zmq_msg).await;
                        }
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Route an inbound frame set to the pending reply map or the delivery
    /// channel.
    async fn dispatch_inbound(
        pending: &PendingMap,
        delivery_tx: &mpsc::Sender<Delivery>,
        zmq_msg: ZmqMessage,
    ) {
        let frames: Vec<_> = zmq_msg.iter().collect();
        let data_frames: Vec<_> = frames
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();
        if data_frames.len() < 2 {
            warn!(frames = frames.len(), "unexpected frame count on DEALER recv");
            return;
        }

        let envelope = match Message::from_bytes(data_frames[1].as_ref()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode inbound envelope");
                return;
            }
        };

        if envelope.topic == DELIVER {
            match envelope.decode::<Delivery>() {
                Ok(delivery) => {
                    // Backpressure here is intentional: the broker's
                    // prefetch already bounds what can be in flight.
                    if delivery_tx.send(delivery).await.is_err() {
                        debug!("delivery receiver dropped");
                    }
                }
                Err(e) => warn!(error = %e, "failed to decode delivery"),
            }
            return;
        }

        match envelope.decode::<Reply>() {
            Ok(reply) => {
                let mut map = pending.lock().await;
                if let Some(tx) = map.remove(&envelope.correlation_id) {
                    let _ = tx.send(reply);
                } else {
                    debug!(correlation_id = %envelope.correlation_id, "reply for unknown correlation id");
                }
            }
            Err(e) => warn!(error = %e, "failed to decode reply"),
        }
    }

    // ── Command plumbing ─────────────────────────────────────────────

    async fn enqueue(&self, command: &Command) -> Result<Uuid, BusError> {
        let envelope = Message::new(COMMAND, command)?;
        let correlation_id = envelope.correlation_id;
        let envelope_bytes = envelope.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(COMMAND);
        zmq_msg.push_back(envelope_bytes.into());
        self.send_tx
            .send(zmq_msg)
            .await
            .map_err(|_| BusError::Transport("client event loop closed".into()))?;
        Ok(correlation_id)
    }

    async fn request(&self, command: Command, timeout: Duration) -> Result<Reply, BusError> {
        let (tx, rx) = oneshot::channel();
        let envelope = Message::new(COMMAND, &command)?;
        let correlation_id = envelope.correlation_id;
        {
            let mut map = self.pending.lock().await;
            map.insert(correlation_id, tx);
        }

        let envelope_bytes = envelope.to_bytes()?;
        let mut zmq_msg = ZmqMessage::from(COMMAND);
        zmq_msg.push_back(envelope_bytes.into());
        if self.send_tx.send(zmq_msg).await.is_err() {
            self.pending.lock().await.remove(&correlation_id);
            return Err(BusError::Transport("client event loop closed".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&correlation_id);
                Err(BusError::Transport("reply channel closed unexpectedly".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&correlation_id);
                Err(BusError::Timeout(timeout))
            }
        }
    }

    // ── Adapter operations ───────────────────────────────────────────

    /// Liveness probe.
    pub async fn ping(&self, timeout: Duration) -> Result<(), BusError> {
        match self.request(Command::Ping, timeout).await? {
            Reply::Pong => Ok(()),
            other => Err(BusError::Broker(format!("unexpected reply {other:?}"))),
        }
    }

    /// Declare a topic exchange (idempotent).
    pub async fn declare_exchange(&self, name: &str) -> Result<(), BusError> {
        match self
            .request(
                Command::DeclareExchange {
                    name: name.to_string(),
                },
                REQUEST_TIMEOUT,
            )
            .await?
        {
            Reply::ExchangeDeclared => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Declare a queue (idempotent), returning its current depth.
    pub async fn declare_queue(&self, name: &str) -> Result<u64, BusError> {
        match self
            .request(
                Command::DeclareQueue {
                    name: name.to_string(),
                },
                REQUEST_TIMEOUT,
            )
            .await?
        {
            Reply::QueueDeclared { depth } => Ok(depth),
            other => Err(unexpected(other)),
        }
    }

    /// Bind a queue to an exchange under a routing pattern.
    pub async fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BusError> {
        match self
            .request(
                Command::Bind {
                    queue: queue.to_string(),
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                },
                REQUEST_TIMEOUT,
            )
            .await?
        {
            Reply::Bound => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Publish and wait for the broker confirm. With `mandatory`, a publish
    /// that matches no queue fails with [`BusError::NotDelivered`].
    pub async fn publish_confirm<T: serde::Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &T,
        mandatory: bool,
    ) -> Result<(), BusError> {
        let body = serde_json::to_value(body)?;
        match self
            .request(
                Command::Publish {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body,
                    mandatory,
                },
                REQUEST_TIMEOUT,
            )
            .await?
        {
            Reply::Published => Ok(()),
            Reply::NotDelivered => Err(BusError::NotDelivered {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Register this adapter as the consumer of `queue`. At most `prefetch`
    /// deliveries are in flight at once (0 = unlimited); each must be
    /// [`ack`](Self::ack)-ed or [`nack`](Self::nack)-ed.
    pub async fn consume(&self, queue: &str, prefetch: u32) -> Result<(), BusError> {
        match self
            .request(
                Command::Consume {
                    queue: queue.to_string(),
                    prefetch,
                },
                REQUEST_TIMEOUT,
            )
            .await?
        {
            Reply::Consuming => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Block until the next delivery for any consumed queue arrives.
    pub async fn next_delivery(&self) -> Result<Delivery, BusError> {
        let mut receiver = self.deliveries.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| BusError::Transport("client event loop closed".into()))
    }

    /// Like [`next_delivery`](Self::next_delivery) but gives up after
    /// `timeout`, returning `Ok(None)`.
    pub async fn next_delivery_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BusError> {
        match tokio::time::timeout(timeout, self.next_delivery()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Acknowledge a delivery.
    pub async fn ack(&self, delivery_tag: u64) -> Result<(), BusError> {
        self.enqueue(&Command::Ack { delivery_tag }).await?;
        Ok(())
    }

    /// Reject a delivery, optionally requeueing it at the queue front.
    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BusError> {
        self.enqueue(&Command::Nack {
            delivery_tag,
            requeue,
        })
        .await?;
        Ok(())
    }

    /// The worker's single pacing sleep. The adapter's socket I/O runs on
    /// its background task, so the broker connection stays serviced for the
    /// whole wait.
    pub async fn pace(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

fn unexpected(reply: Reply) -> BusError {
    match reply {
        Reply::Error { message } => BusError::Broker(message),
        other => BusError::Broker(format!("unexpected reply {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConfig, BusBroker};

    async fn start_broker(port: u16) -> tokio::task::JoinHandle<Result<(), BusError>> {
        let broker = BusBroker::new(BrokerConfig::tcp("127.0.0.1", port));
        let handle = tokio::spawn(async move { broker.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle
    }

    async fn connected_client(port: u16) -> BusClient {
        let transport = Transport::tcp("127.0.0.1", port);
        let client = BusClient::connect(&transport).await.unwrap();
        client.ping(Duration::from_secs(2)).await.unwrap();
        client
    }

    #[tokio::test]
    async fn declare_bind_publish_consume_ack() {
        let broker = start_broker(15820).await;
        let publisher = connected_client(15820).await;
        let consumer = connected_client(15820).await;

        publisher.declare_exchange("raw_data").await.unwrap();
        assert_eq!(consumer.declare_queue("system_input").await.unwrap(), 0);
        consumer
            .bind("system_input", "raw_data", "monitor.system.#")
            .await
            .unwrap();

        publisher
            .publish_confirm(
                "raw_data",
                "monitor.system.chain_1",
                &serde_json::json!({"n": 1}),
                true,
            )
            .await
            .unwrap();

        consumer.consume("system_input", 10).await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(3), consumer.next_delivery())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(delivery.routing_key, "monitor.system.chain_1");
        assert_eq!(delivery.body["n"], 1);
        assert!(!delivery.redelivered);
        consumer.ack(delivery.delivery_tag).await.unwrap();

        broker.abort();
    }

    #[tokio::test]
    async fn mandatory_publish_without_queue_is_not_delivered() {
        let broker = start_broker(15821).await;
        let publisher = connected_client(15821).await;

        publisher.declare_exchange("alert").await.unwrap();
        let err = publisher
            .publish_confirm("alert", "alerter.system.chain_1", &serde_json::json!({}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotDelivered { .. }));

        // Non-mandatory publishes are confirmed even with no queue.
        publisher
            .publish_confirm("alert", "alerter.system.chain_1", &serde_json::json!({}), false)
            .await
            .unwrap();

        broker.abort();
    }

    #[tokio::test]
    async fn queue_depth_counts_ready_messages() {
        let broker = start_broker(15822).await;
        let client = connected_client(15822).await;

        client.declare_exchange("store").await.unwrap();
        client.declare_queue("store_input").await.unwrap();
        client
            .bind("store_input", "store", "transformer.#")
            .await
            .unwrap();

        for i in 0..3 {
            client
                .publish_confirm(
                    "store",
                    "transformer.system.chain_1",
                    &serde_json::json!({"i": i}),
                    true,
                )
                .await
                .unwrap();
        }
        assert_eq!(client.declare_queue("store_input").await.unwrap(), 3);

        broker.abort();
    }

    #[tokio::test]
    async fn nack_requeues_and_marks_redelivered() {
        let broker = start_broker(15823).await;
        let client = connected_client(15823).await;

        client.declare_exchange("raw_data").await.unwrap();
        client.declare_queue("q").await.unwrap();
        client.bind("q", "raw_data", "#").await.unwrap();
        client
            .publish_confirm("raw_data", "monitor.system.c1", &serde_json::json!({"x": 9}), true)
            .await
            .unwrap();

        client.consume("q", 1).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(3), client.next_delivery())
            .await
            .expect("timed out")
            .unwrap();
        assert!(!first.redelivered);
        client.nack(first.delivery_tag, true).await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(3), client.next_delivery())
            .await
            .expect("timed out")
            .unwrap();
        assert!(second.redelivered);
        assert_eq!(second.body["x"], 9);

        broker.abort();
    }

    #[tokio::test]
    async fn prefetch_bounds_in_flight_deliveries() {
        let broker = start_broker(15824).await;
        let client = connected_client(15824).await;

        client.declare_exchange("raw_data").await.unwrap();
        client.declare_queue("q").await.unwrap();
        client.bind("q", "raw_data", "#").await.unwrap();
        for i in 0..2 {
            client
                .publish_confirm("raw_data", "k", &serde_json::json!({"i": i}), true)
                .await
                .unwrap();
        }

        client.consume("q", 1).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(3), client.next_delivery())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(first.body["i"], 0);

        // The second message must not arrive while the first is unacked.
        let held_back = client
            .next_delivery_timeout(Duration::from_millis(300))
            .await
            .unwrap();
        assert!(held_back.is_none());

        client.ack(first.delivery_tag).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(3), client.next_delivery())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(second.body["i"], 1);

        broker.abort();
    }
}
