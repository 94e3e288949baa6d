//! The health checker: periodic pings and the liveness table.
//!
//! Publishes `ping` on the health-check exchange on a fixed cadence and
//! folds `heartbeat.worker` / `heartbeat.manager` messages into a
//! component → last-seen table. Components silent for several ping
//! periods are logged as stale.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use lookout_bus::{
    exchanges, routing, BusClient, BusError, BusWorker, ManagerHeartbeat, Transport,
    WorkerHeartbeat,
};
use lookout_core::{now_ts, Environment};

const HEARTBEAT_QUEUE: &str = "health_checker_input";
const PREFETCH: u32 = 100;
/// Silent for this many ping periods ⇒ stale.
const STALE_PERIODS: f64 = 3.0;

pub struct HealthChecker {
    name: String,
    broker: Transport,
    ping_period: Duration,
    /// component name → last heartbeat timestamp.
    last_seen: HashMap<String, f64>,
}

impl HealthChecker {
    pub fn new(name: impl Into<String>, env: &Environment, ping_period: Duration) -> Self {
        Self {
            name: name.into(),
            broker: Transport::tcp(env.broker_host.clone(), env.broker_port),
            ping_period,
            last_seen: HashMap::new(),
        }
    }

    fn record(&mut self, component: String, timestamp: f64) {
        self.last_seen.insert(component, timestamp);
    }

    fn stale_components(&self, now: f64) -> Vec<&str> {
        let cutoff = now - STALE_PERIODS * self.ping_period.as_secs_f64();
        self.last_seen
            .iter()
            .filter(|(_, &seen)| seen < cutoff)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[async_trait]
impl BusWorker for HealthChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;
        client.declare_exchange(exchanges::HEALTH_CHECK).await?;
        client.declare_queue(HEARTBEAT_QUEUE).await?;
        client
            .bind(HEARTBEAT_QUEUE, exchanges::HEALTH_CHECK, "heartbeat.#")
            .await?;
        client.consume(HEARTBEAT_QUEUE, PREFETCH).await?;

        info!(worker = %self.name, period = ?self.ping_period, "health checker running");
        let mut ticker = tokio::time::interval(self.ping_period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Non-mandatory: a ping with no manager around is fine.
                    client
                        .publish_confirm(exchanges::HEALTH_CHECK, routing::PING, &serde_json::json!({}), false)
                        .await?;

                    let now = now_ts();
                    for component in self.stale_components(now) {
                        warn!(component, "no heartbeat received recently");
                    }
                }
                delivery = client.next_delivery() => {
                    let delivery = delivery?;
                    if delivery.routing_key == routing::HEARTBEAT_MANAGER {
                        match serde_json::from_value::<ManagerHeartbeat>(delivery.body.clone()) {
                            Ok(hb) => {
                                if !hb.dead.is_empty() {
                                    warn!(manager = %hb.component_name, dead = ?hb.dead, "manager reports dead children");
                                }
                                let timestamp = hb.timestamp;
                                for child in hb.running {
                                    self.record(child, timestamp);
                                }
                                self.record(hb.component_name, timestamp);
                            }
                            Err(e) => warn!(error = %e, "malformed manager heartbeat"),
                        }
                    } else {
                        match serde_json::from_value::<WorkerHeartbeat>(delivery.body.clone()) {
                            Ok(hb) => self.record(hb.component_name, hb.timestamp),
                            Err(e) => warn!(error = %e, "malformed worker heartbeat"),
                        }
                    }
                    client.ack(delivery.delivery_tag).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> HealthChecker {
        HealthChecker {
            name: "health-checker".into(),
            broker: Transport::tcp("127.0.0.1", 5672),
            ping_period: Duration::from_secs(30),
            last_seen: HashMap::new(),
        }
    }

    #[test]
    fn staleness_uses_three_ping_periods() {
        let mut health = checker();
        health.record("system-monitor (host-a)".into(), 1000.0);
        health.record("store-worker".into(), 1085.0);

        // 30s period → cutoff at now - 90.
        assert_eq!(health.stale_components(1095.0), vec!["system-monitor (host-a)"]);
        assert!(health.stale_components(1080.0).is_empty());
    }
}
