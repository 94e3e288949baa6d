//! The alerts-handler worker: alert exchange → configured channels.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, warn};

use lookout_bus::{exchanges, routing, BusClient, BusError, BusWorker, Transport, WorkerHeartbeat};
use lookout_core::{now_ts, Alert, Environment};

use crate::traits::ChannelHandler;

const INPUT_QUEUE: &str = "alerts_handler_input";
const PREFETCH: u32 = 100;

pub struct AlertsHandlerWorker {
    name: String,
    broker: Transport,
    channels: Vec<Box<dyn ChannelHandler>>,
}

impl AlertsHandlerWorker {
    pub fn new(name: impl Into<String>, env: &Environment, channels: Vec<Box<dyn ChannelHandler>>) -> Self {
        Self {
            name: name.into(),
            broker: Transport::tcp(env.broker_host.clone(), env.broker_port),
            channels,
        }
    }

    /// Deliver to every channel; individual failures don't block the rest.
    /// Returns whether every channel succeeded.
    async fn dispatch(&self, alert: &Alert) -> bool {
        let mut all_ok = true;
        for channel in &self.channels {
            let start = Instant::now();
            match channel.send(alert).await {
                Ok(()) => {
                    info!(
                        channel = channel.channel_name(),
                        code = %alert.alert_code.name,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "alert delivered"
                    );
                }
                Err(e) => {
                    warn!(
                        channel = channel.channel_name(),
                        code = %alert.alert_code.name,
                        error = %e,
                        "alert delivery failed"
                    );
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

#[async_trait]
impl BusWorker for AlertsHandlerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;
        client.declare_exchange(exchanges::ALERT).await?;
        client.declare_exchange(exchanges::HEALTH_CHECK).await?;

        client.declare_queue(INPUT_QUEUE).await?;
        client
            .bind(INPUT_QUEUE, exchanges::ALERT, "alerter.#")
            .await?;
        client.consume(INPUT_QUEUE, PREFETCH).await?;

        info!(worker = %self.name, channels = self.channels.len(), "alerts handler consuming");
        loop {
            let delivery = client.next_delivery().await?;

            let alert: Alert = match serde_json::from_value(delivery.body.clone()) {
                Ok(alert) => alert,
                Err(e) => {
                    error!(error = %e, "malformed alert record, dropping");
                    client.ack(delivery.delivery_tag).await?;
                    continue;
                }
            };

            // Purge signals are for the store and alerters, not humans.
            if alert.is_component_reset() {
                client.ack(delivery.delivery_tag).await?;
                continue;
            }

            let delivered = self.dispatch(&alert).await;
            client.ack(delivery.delivery_tag).await?;

            if delivered {
                client
                    .publish_confirm(
                        exchanges::HEALTH_CHECK,
                        routing::HEARTBEAT_WORKER,
                        &WorkerHeartbeat::alive(&self.name, now_ts()),
                        false,
                    )
                    .await?;
            }
        }
    }
}
