//! The alerter worker loop and publishing queue.
//!
//! An alerter is both consumer and producer: it consumes transformed
//! alert payloads and config documents, classifies them into alert
//! records, and drains a bounded publishing queue to the alert exchange.
//! A record that cannot be delivered stays queued; the input is still
//! acked (classification is reproducible from state only within a round,
//! so losing the queue head is preferred over double-alerting).

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use lookout_bus::{
    exchanges, routing, BusClient, BusError, BusWorker, ConfigDocument, TransformedMessage,
    Transport, WorkerHeartbeat,
};
use lookout_core::{now_ts, Alert, EntityKind, Environment};

/// A per-kind alert classifier.
pub trait Alerter: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> EntityKind;

    /// Classify one transformed message into zero or more alert records.
    fn classify(&mut self, message: &TransformedMessage) -> Vec<Alert>;

    /// Routing pattern for the config subtree this alerter follows, or
    /// `None` if it is not config-driven.
    fn config_pattern(&self) -> Option<String> {
        None
    }

    /// Apply a config document (add/update on content, removal when the
    /// document is empty).
    fn handle_config(&mut self, _chain_name: &str, _doc: &ConfigDocument) {}

    /// Purge all dedup and rule state tied to a chain. Called when a
    /// `ComponentReset` control alert arrives, so stale alert identities
    /// cannot survive a component restart.
    fn handle_reset(&mut self, _parent_id: &str) {}
}

/// Chain name from a config path like `chains/chainlink/bsc/alerts_config`.
pub fn chain_name_from_path(path: &str) -> Option<&str> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop()?;
    segments.pop()
}

struct QueuedAlert {
    routing_key: String,
    alert: Alert,
}

pub struct AlerterWorker<A: Alerter> {
    alerter: A,
    env: Environment,
    broker: Transport,
    /// Bounded; old alerts are dropped before new ones are lost.
    publish_queue: VecDeque<QueuedAlert>,
}

impl<A: Alerter> AlerterWorker<A> {
    pub fn new(alerter: A, env: Environment) -> Self {
        let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
        Self {
            alerter,
            env,
            broker,
            publish_queue: VecDeque::new(),
        }
    }

    fn input_queue(&self) -> String {
        format!("{}_alerter_input", self.alerter.kind())
    }

    fn config_queue(&self) -> String {
        format!("{}_alerter_config", self.alerter.kind())
    }

    fn reset_queue(&self) -> String {
        format!("{}_alerter_reset", self.alerter.kind())
    }

    fn enqueue_alerts(&mut self, alerts: Vec<Alert>) {
        for alert in alerts {
            if self.publish_queue.len() >= self.env.alerter_queue_size {
                warn!(worker = %self.alerter.name(), "publishing queue full, dropping oldest alert");
                self.publish_queue.pop_front();
            }
            let routing_key = routing::alert(self.alerter.kind(), &alert.parent_id);
            if self.env.enable_console_alerts {
                println!(
                    "[{}] {} | {}",
                    alert.severity, alert.alert_code.name, alert.message
                );
            }
            self.publish_queue.push_back(QueuedAlert { routing_key, alert });
        }
    }

    /// Drain the publishing queue. `NotDelivered` keeps the record queued
    /// and reports the round as dirty (no heartbeat).
    async fn drain_queue(&mut self, client: &BusClient) -> Result<bool, BusError> {
        while let Some(next) = self.publish_queue.front() {
            match client
                .publish_confirm(exchanges::ALERT, &next.routing_key, &next.alert, true)
                .await
            {
                Ok(()) => {
                    debug!(code = %next.alert.alert_code.name, "alert published");
                    self.publish_queue.pop_front();
                }
                Err(e @ BusError::NotDelivered { .. }) => {
                    error!(error = %e, "alert unroutable, keeping it queued");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl<A: Alerter> BusWorker for AlerterWorker<A> {
    fn name(&self) -> &str {
        self.alerter.name()
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;
        client.declare_exchange(exchanges::ALERT).await?;
        client.declare_exchange(exchanges::CONFIG).await?;
        client.declare_exchange(exchanges::HEALTH_CHECK).await?;

        let kind = self.alerter.kind();
        let input_queue = self.input_queue();
        client.declare_queue(&input_queue).await?;
        client
            .bind(&input_queue, exchanges::ALERT, &format!("transformer.{kind}.#"))
            .await?;
        let prefetch = (self.env.alerter_queue_size / 5).max(1) as u32;
        client.consume(&input_queue, prefetch).await?;

        let config_queue = self.config_queue();
        if let Some(pattern) = self.alerter.config_pattern() {
            client.declare_queue(&config_queue).await?;
            client
                .bind(&config_queue, exchanges::CONFIG, &pattern)
                .await?;
            client.consume(&config_queue, prefetch).await?;
        }

        // The same `ComponentReset` that makes the store purge a chain's
        // slice clears this alerter's dedup state for it.
        let reset_queue = self.reset_queue();
        client.declare_queue(&reset_queue).await?;
        client
            .bind(&reset_queue, exchanges::ALERT, "manager.component_reset.#")
            .await?;
        client.consume(&reset_queue, prefetch).await?;

        info!(worker = %self.alerter.name(), queue = %input_queue, "alerter consuming");
        loop {
            let delivery = client.next_delivery().await?;

            let clean = if delivery.queue == reset_queue {
                match serde_json::from_value::<Alert>(delivery.body.clone()) {
                    Ok(alert) if alert.is_component_reset() => {
                        info!(
                            component = %alert.origin_id,
                            parent_id = %alert.parent_id,
                            "clearing rule state for component reset"
                        );
                        self.alerter.handle_reset(&alert.parent_id);
                        true
                    }
                    Ok(_) => true,
                    Err(e) => {
                        error!(error = %e, "malformed alert on reset queue, dropping");
                        true
                    }
                }
            } else if delivery.queue == config_queue {
                match serde_json::from_value::<ConfigDocument>(delivery.body.clone()) {
                    Ok(doc) => {
                        match chain_name_from_path(&doc.path) {
                            Some(chain_name) => self.alerter.handle_config(chain_name, &doc),
                            None => warn!(path = %doc.path, "config path carries no chain name"),
                        }
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "malformed config document, dropping");
                        true
                    }
                }
            } else {
                match serde_json::from_value::<TransformedMessage>(delivery.body.clone()) {
                    Ok(message) => {
                        let alerts = self.alerter.classify(&message);
                        self.enqueue_alerts(alerts);
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "malformed transformed message, dropping");
                        true
                    }
                }
            };

            client.ack(delivery.delivery_tag).await?;

            let drained = self.drain_queue(&client).await?;
            if clean && drained {
                client
                    .publish_confirm(
                        exchanges::HEALTH_CHECK,
                        routing::HEARTBEAT_WORKER,
                        &WorkerHeartbeat::alive(self.alerter.name(), now_ts()),
                        false,
                    )
                    .await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_name_is_the_directory_above_the_file() {
        assert_eq!(
            chain_name_from_path("chains/chainlink/bsc/alerts_config"),
            Some("bsc")
        );
        assert_eq!(chain_name_from_path("general/repos_config"), Some("general"));
        assert_eq!(chain_name_from_path("alerts_config"), None);
    }
}
