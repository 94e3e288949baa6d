//! The manager worker loop.
//!
//! A manager owns two adapters: one for data (reset alerts, config
//! consumption) and one for the health-check traffic (pings in, aggregate
//! heartbeats out). The ping handler restarts dead children — reset alert
//! first — and only then builds the heartbeat, so a successfully
//! restarted child reports as running.

use async_trait::async_trait;
use tracing::{error, info, warn};

use lookout_bus::{
    exchanges, routing, BusClient, BusError, BusWorker, ConfigDocument, ManagerHeartbeat,
    Transport,
};
use lookout_core::{now_ts, Environment};

use crate::families::Family;
use crate::supervisor::Supervisor;

const PING_PREFETCH: u32 = 10;

pub struct ManagerWorker<F: Family> {
    family: F,
    env: Environment,
    broker: Transport,
    supervisor: Supervisor,
}

impl<F: Family> ManagerWorker<F> {
    pub fn new(family: F, env: Environment) -> Self {
        let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
        Self {
            family,
            env,
            broker,
            supervisor: Supervisor::new(),
        }
    }

    fn ping_queue(&self) -> String {
        format!("{}_ping", self.family.name())
    }

    fn config_queue(&self) -> String {
        format!("{}_config", self.family.name())
    }

    /// Restart anything dead (reset first), then report the aggregate
    /// state. The heartbeat reflects the table *after* the restarts.
    async fn handle_ping(
        &mut self,
        data_client: &BusClient,
        heartbeat_client: &BusClient,
    ) -> Result<(), BusError> {
        let (_, dead) = self.supervisor.partition();
        if !dead.is_empty() {
            warn!(manager = %self.family.name(), ?dead, "restarting dead children");
            self.supervisor.start_children(data_client).await?;
        }

        let (running, dead) = self.supervisor.partition();
        let heartbeat = ManagerHeartbeat {
            component_name: self.family.name().to_string(),
            running,
            dead,
            timestamp: now_ts(),
        };
        match heartbeat_client
            .publish_confirm(
                exchanges::HEALTH_CHECK,
                routing::HEARTBEAT_MANAGER,
                &heartbeat,
                false,
            )
            .await
        {
            Ok(()) => Ok(()),
            // No point retrying a heartbeat; the next ping sends another.
            Err(e @ BusError::NotDelivered { .. }) => {
                warn!(error = %e, "manager heartbeat not delivered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply one config document: replace the chain's child specs
    /// (terminating changed children so they restart with the new
    /// config), or remove them when the document is empty.
    async fn handle_config(
        &mut self,
        data_client: &BusClient,
        doc: &ConfigDocument,
    ) -> Result<(), BusError> {
        let Some(chain_name) = crate::chain_name_from_config_path(&doc.path) else {
            warn!(path = %doc.path, "config path carries no chain name");
            return Ok(());
        };
        let prefix = self.family.chain_child_prefix(chain_name);

        let new_specs = if doc.sections.is_empty() {
            Vec::new()
        } else {
            self.family.specs_for_chain(chain_name, doc, &self.env)
        };

        // Terminate children the new config no longer names (their reset
        // is emitted when — if ever — they are started again) and changed
        // children, which restart below with the fresh spec.
        let existing: Vec<String> = self
            .supervisor
            .child_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        for name in existing {
            let keep = new_specs
                .iter()
                .any(|spec| spec.name == name && Some(spec) == self.supervisor.spec(&name));
            if !keep {
                info!(child = %name, "removing child after config change");
                self.supervisor.remove_spec(&name).await;
            }
        }

        for spec in new_specs {
            self.supervisor.set_spec(spec);
        }
        self.supervisor.start_children(data_client).await?;
        Ok(())
    }
}

#[async_trait]
impl<F: Family> BusWorker for ManagerWorker<F> {
    fn name(&self) -> &str {
        self.family.name()
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let data_client = BusClient::connect_until_successful(&self.broker).await;
        let heartbeat_client = BusClient::connect_until_successful(&self.broker).await;

        data_client.declare_exchange(exchanges::ALERT).await?;
        data_client.declare_exchange(exchanges::CONFIG).await?;
        heartbeat_client
            .declare_exchange(exchanges::HEALTH_CHECK)
            .await?;

        let ping_queue = self.ping_queue();
        heartbeat_client.declare_queue(&ping_queue).await?;
        heartbeat_client
            .bind(&ping_queue, exchanges::HEALTH_CHECK, routing::PING)
            .await?;
        heartbeat_client.consume(&ping_queue, PING_PREFETCH).await?;

        let config_queue = self.config_queue();
        if let Some(pattern) = self.family.config_pattern() {
            data_client.declare_queue(&config_queue).await?;
            data_client
                .bind(&config_queue, exchanges::CONFIG, &pattern)
                .await?;
            data_client.consume(&config_queue, PING_PREFETCH).await?;
        }

        for spec in self.family.initial_specs(&self.env) {
            self.supervisor.set_spec(spec);
        }
        self.supervisor.start_children(&data_client).await?;

        info!(manager = %self.family.name(), "manager running");
        loop {
            tokio::select! {
                delivery = heartbeat_client.next_delivery() => {
                    let delivery = delivery?;
                    self.handle_ping(&data_client, &heartbeat_client).await?;
                    heartbeat_client.ack(delivery.delivery_tag).await?;
                }
                delivery = data_client.next_delivery() => {
                    let delivery = delivery?;
                    match serde_json::from_value::<ConfigDocument>(delivery.body.clone()) {
                        Ok(doc) => self.handle_config(&data_client, &doc).await?,
                        Err(e) => error!(error = %e, "malformed config document, dropping"),
                    }
                    data_client.ack(delivery.delivery_tag).await?;
                }
                _ = lookout_bus::shutdown_signal() => {
                    info!(manager = %self.family.name(), "terminating children");
                    self.supervisor.terminate_all().await;
                    return Ok(());
                }
            }
        }
    }
}
