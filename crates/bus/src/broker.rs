//! The broker process: queue and binding tables behind a ROUTER socket.
//!
//! Publishers and consumers connect with DEALER sockets and speak the
//! [`protocol`](crate::protocol) command set. The broker confirms every
//! publish, bounds in-flight deliveries per consumer by its prefetch, and
//! requeues unacked messages when a consumer goes away.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{RouterSocket, ZmqMessage};

use crate::error::BusError;
use crate::message::Message;
use crate::protocol::{Command, Delivery, Reply, DELIVER, REPLY};
use crate::topic::topic_matches;
use crate::transport::Transport;

/// How long the proxy loop blocks on recv before re-checking shutdown.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Configuration for the bus broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Endpoint the ROUTER socket binds; all adapters connect here.
    pub frontend: Transport,
}

impl BrokerConfig {
    pub fn local() -> Self {
        Self {
            frontend: Transport::ipc("broker"),
        }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            frontend: Transport::tcp(host, port),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::local()
    }
}

/// A message sitting in a queue (or in flight, awaiting ack).
#[derive(Debug, Clone)]
struct QueuedMessage {
    exchange: String,
    routing_key: String,
    body: serde_json::Value,
    redelivered: bool,
}

/// The single registered consumer of a queue.
#[derive(Debug)]
struct Consumer {
    identity: Vec<u8>,
    prefetch: u32,
    in_flight: u32,
}

impl Consumer {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < self.prefetch
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueuedMessage>,
    consumer: Option<Consumer>,
}

#[derive(Debug)]
struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

/// In-memory broker state, owned by the run loop.
#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    /// delivery_tag → (queue, message), for everything in flight.
    unacked: HashMap<u64, (String, QueuedMessage)>,
    next_tag: u64,
}

/// The broker. One instance per deployment; run via [`BusBroker::run`].
pub struct BusBroker {
    config: BrokerConfig,
    shutdown: Arc<AtomicBool>,
    forwarded: AtomicU64,
}

impl BusBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            forwarded: AtomicU64::new(0),
        }
    }

    /// Handle for signalling graceful shutdown from another task.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Bind the ROUTER socket and run the command loop until shutdown.
    pub async fn run(&self) -> Result<(), BusError> {
        self.config.frontend.ensure_ipc_dir()?;
        self.config.frontend.remove_stale_socket()?;

        let mut socket = RouterSocket::new();
        socket.bind(&self.config.frontend.endpoint()).await?;
        tracing::info!(
            endpoint = %self.config.frontend.endpoint(),
            "broker frontend (ROUTER) bound — adapters connect here"
        );

        let mut state = BrokerState::default();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!("broker shutting down");
                break;
            }

            let zmq_msg = match timeout(RECV_POLL, socket.recv()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "frontend recv error");
                    continue;
                }
                // Timeout — loop back to check the shutdown flag.
                Err(_) => continue,
            };

            let (identity, envelope) = match split_frames(&zmq_msg) {
                Some(parts) => parts,
                None => {
                    tracing::warn!(frames = zmq_msg.iter().count(), "dropping malformed frame set");
                    continue;
                }
            };

            let command = match envelope.decode::<Command>() {
                Ok(cmd) => cmd,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable command");
                    continue;
                }
            };

            self.forwarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                command = ?command_name(&command),
                total = self.forwarded.load(Ordering::Relaxed),
                "handling command"
            );

            let touched =
                Self::handle_command(&mut state, &mut socket, &identity, envelope.correlation_id, command)
                    .await;

            for queue in touched {
                Self::dispatch_queue(&mut state, &mut socket, &queue).await;
            }
        }

        tracing::info!(
            total = self.forwarded.load(Ordering::Relaxed),
            "broker stopped"
        );
        Ok(())
    }

    /// Apply one command, send its reply, and return the queues whose
    /// delivery state may have changed.
    async fn handle_command(
        state: &mut BrokerState,
        socket: &mut RouterSocket,
        identity: &[u8],
        correlation_id: Uuid,
        command: Command,
    ) -> Vec<String> {
        let mut touched = Vec::new();
        let reply = match command {
            Command::Ping => Some(Reply::Pong),
            Command::DeclareExchange { name } => {
                state.exchanges.insert(name);
                Some(Reply::ExchangeDeclared)
            }
            Command::DeclareQueue { name } => {
                let queue = state.queues.entry(name).or_default();
                Some(Reply::QueueDeclared {
                    depth: queue.ready.len() as u64,
                })
            }
            Command::Bind {
                queue,
                exchange,
                routing_key,
            } => {
                if !state.queues.contains_key(&queue) {
                    Some(Reply::Error {
                        message: format!("unknown queue '{queue}'"),
                    })
                } else if !state.exchanges.contains(&exchange) {
                    Some(Reply::Error {
                        message: format!("unknown exchange '{exchange}'"),
                    })
                } else {
                    let duplicate = state.bindings.iter().any(|b| {
                        b.exchange == exchange && b.pattern == routing_key && b.queue == queue
                    });
                    if !duplicate {
                        state.bindings.push(Binding {
                            exchange,
                            pattern: routing_key,
                            queue,
                        });
                    }
                    Some(Reply::Bound)
                }
            }
            Command::Publish {
                exchange,
                routing_key,
                body,
                mandatory,
            } => {
                if !state.exchanges.contains(&exchange) {
                    Some(Reply::Error {
                        message: format!("unknown exchange '{exchange}'"),
                    })
                } else {
                    let matched: HashSet<String> = state
                        .bindings
                        .iter()
                        .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, &routing_key))
                        .map(|b| b.queue.clone())
                        .collect();

                    if matched.is_empty() && mandatory {
                        Some(Reply::NotDelivered)
                    } else {
                        for queue_name in &matched {
                            if let Some(queue) = state.queues.get_mut(queue_name) {
                                queue.ready.push_back(QueuedMessage {
                                    exchange: exchange.clone(),
                                    routing_key: routing_key.clone(),
                                    body: body.clone(),
                                    redelivered: false,
                                });
                            }
                        }
                        touched.extend(matched);
                        Some(Reply::Published)
                    }
                }
            }
            Command::Consume { queue, prefetch } => match state.queues.get_mut(&queue) {
                Some(entry) => {
                    entry.consumer = Some(Consumer {
                        identity: identity.to_vec(),
                        prefetch,
                        in_flight: 0,
                    });
                    touched.push(queue);
                    Some(Reply::Consuming)
                }
                None => Some(Reply::Error {
                    message: format!("unknown queue '{queue}'"),
                }),
            },
            Command::Ack { delivery_tag } => {
                if let Some((queue_name, _)) = state.unacked.remove(&delivery_tag) {
                    if let Some(consumer) = state
                        .queues
                        .get_mut(&queue_name)
                        .and_then(|q| q.consumer.as_mut())
                    {
                        consumer.in_flight = consumer.in_flight.saturating_sub(1);
                    }
                    touched.push(queue_name);
                }
                None
            }
            Command::Nack {
                delivery_tag,
                requeue,
            } => {
                if let Some((queue_name, mut message)) = state.unacked.remove(&delivery_tag) {
                    if let Some(queue) = state.queues.get_mut(&queue_name) {
                        if let Some(consumer) = queue.consumer.as_mut() {
                            consumer.in_flight = consumer.in_flight.saturating_sub(1);
                        }
                        if requeue {
                            message.redelivered = true;
                            queue.ready.push_front(message);
                        }
                    }
                    touched.push(queue_name);
                }
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = send_to(socket, identity, REPLY, &reply, correlation_id).await {
                tracing::warn!(error = %e, "failed to send reply");
            }
        }

        touched
    }

    /// Push ready messages to the queue's consumer, up to its prefetch.
    async fn dispatch_queue(state: &mut BrokerState, socket: &mut RouterSocket, queue_name: &str) {
        loop {
            let Some(queue) = state.queues.get_mut(queue_name) else {
                return;
            };
            let Some(consumer) = queue.consumer.as_mut() else {
                return;
            };
            if !consumer.has_capacity() || queue.ready.is_empty() {
                return;
            }

            let Some(message) = queue.ready.pop_front() else {
                return;
            };
            state.next_tag += 1;
            let tag = state.next_tag;

            let delivery = Delivery {
                delivery_tag: tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                queue: queue_name.to_string(),
                body: message.body.clone(),
                redelivered: message.redelivered,
            };
            let identity = consumer.identity.clone();
            consumer.in_flight += 1;
            state
                .unacked
                .insert(tag, (queue_name.to_string(), message));

            if let Err(e) = send_to(socket, &identity, DELIVER, &delivery, Uuid::new_v4()).await {
                // The consumer is gone: drop its registration and put
                // everything it had in flight back at the queue front.
                tracing::warn!(queue = %queue_name, error = %e, "consumer send failed, requeueing");
                Self::drop_consumer(state, queue_name);
                return;
            }
        }
    }

    /// Remove a queue's consumer and requeue its unacked messages.
    fn drop_consumer(state: &mut BrokerState, queue_name: &str) {
        let tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, (queue, _))| queue == queue_name)
            .map(|(tag, _)| *tag)
            .collect();

        // Higher tags were delivered later; pushing them front in descending
        // order restores the original ordering.
        let mut tags = tags;
        tags.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(queue) = state.queues.get_mut(queue_name) {
            queue.consumer = None;
            for tag in tags {
                if let Some((_, mut message)) = state.unacked.remove(&tag) {
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
            }
        }
    }
}

/// ROUTER recv frames: `[identity, <empty>?, topic, envelope]`.
fn split_frames(zmq_msg: &ZmqMessage) -> Option<(Vec<u8>, Message)> {
    let frames: Vec<_> = zmq_msg.iter().collect();
    let identity = frames.first()?.as_ref().to_vec();
    let data_frames: Vec<_> = frames[1..]
        .iter()
        .skip_while(|f| f.as_ref().is_empty())
        .collect();
    if data_frames.len() < 2 {
        return None;
    }
    let envelope = Message::from_bytes(data_frames[1].as_ref()).ok()?;
    Some((identity, envelope))
}

/// Frames sent: `[identity, topic, envelope]` — ROUTER pops the identity
/// and routes the rest to the peer.
async fn send_to<T: serde::Serialize>(
    socket: &mut RouterSocket,
    identity: &[u8],
    topic: &str,
    payload: &T,
    correlation_id: Uuid,
) -> Result<(), BusError> {
    let envelope = Message::with_correlation(topic, payload, correlation_id)?;
    let envelope_bytes = envelope.to_bytes()?;

    let mut zmq_msg = ZmqMessage::from(identity.to_vec());
    zmq_msg.push_back(topic.as_bytes().to_vec().into());
    zmq_msg.push_back(envelope_bytes.into());
    socket.send(zmq_msg).await?;
    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ping => "ping",
        Command::DeclareExchange { .. } => "declare_exchange",
        Command::DeclareQueue { .. } => "declare_queue",
        Command::Bind { .. } => "bind",
        Command::Publish { .. } => "publish",
        Command::Consume { .. } => "consume",
        Command::Ack { .. } => "ack",
        Command::Nack { .. } => "nack",
    }
}
