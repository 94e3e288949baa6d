//! The store worker: persists transformer output, purges on reset.
//!
//! Consumes two queues: the save-payload stream from the store exchange,
//! and `ComponentReset` control alerts from the alert exchange. Everything
//! is acked only after the write/purge succeeded, so a store crash replays
//! the payloads (idempotent overwrites).

use lookout_bus::{exchanges, routing, BusClient, BusError, BusWorker, SavePayload, Transport};
use lookout_core::{now_ts, Alert, Environment};
use tracing::{error, info, warn};

use crate::redis_store::RedisStore;
use crate::StoreError;

const SAVE_QUEUE: &str = "store_save_input";
const RESET_QUEUE: &str = "store_reset_input";
const PREFETCH: u32 = 200;

pub struct StoreWorker {
    name: String,
    env: Environment,
    broker: Transport,
}

impl StoreWorker {
    pub fn new(name: impl Into<String>, env: Environment) -> Self {
        let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
        Self {
            name: name.into(),
            env,
            broker,
        }
    }

    async fn initialise(&self) -> Result<BusClient, BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;

        client.declare_exchange(exchanges::STORE).await?;
        client.declare_exchange(exchanges::ALERT).await?;
        client.declare_exchange(exchanges::HEALTH_CHECK).await?;

        client.declare_queue(SAVE_QUEUE).await?;
        client
            .bind(SAVE_QUEUE, exchanges::STORE, "transformer.#")
            .await?;

        client.declare_queue(RESET_QUEUE).await?;
        client
            .bind(RESET_QUEUE, exchanges::ALERT, "manager.component_reset.#")
            .await?;

        client.consume(SAVE_QUEUE, PREFETCH).await?;
        client.consume(RESET_QUEUE, PREFETCH).await?;
        Ok(client)
    }

    async fn handle_save(
        &self,
        store: &mut RedisStore,
        payload: SavePayload,
    ) -> Result<(), StoreError> {
        store
            .save_fields(
                payload.meta_data.kind,
                &payload.meta_data.id,
                &payload.meta_data.parent_id,
                &payload.fields,
            )
            .await
    }

    async fn handle_reset(&self, store: &mut RedisStore, alert: Alert) -> Result<(), StoreError> {
        if !alert.is_component_reset() {
            // Not a purge signal; nothing for the store to do.
            return Ok(());
        }
        let deleted = store.purge_parent(&alert.parent_id).await?;
        info!(
            component = %alert.origin_id,
            parent_id = %alert.parent_id,
            deleted,
            "purged slice for component reset"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl BusWorker for StoreWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = self.initialise().await?;
        let mut store = RedisStore::connect(
            &self.env.redis_host,
            self.env.redis_port,
            self.env.redis_db,
            &self.env.namespace,
        )
        .await
        .map_err(|e| BusError::Transport(format!("redis connect: {e}")))?;

        info!(worker = %self.name, "store worker consuming");
        loop {
            let delivery = client.next_delivery().await?;

            let outcome = match delivery.queue.as_str() {
                SAVE_QUEUE => match serde_json::from_value::<SavePayload>(delivery.body.clone()) {
                    Ok(payload) => self.handle_save(&mut store, payload).await,
                    Err(e) => {
                        // Schema error: ack and drop.
                        error!(error = %e, "malformed save payload, dropping");
                        client.ack(delivery.delivery_tag).await?;
                        continue;
                    }
                },
                RESET_QUEUE => match serde_json::from_value::<Alert>(delivery.body.clone()) {
                    Ok(alert) => self.handle_reset(&mut store, alert).await,
                    Err(e) => {
                        error!(error = %e, "malformed alert on reset queue, dropping");
                        client.ack(delivery.delivery_tag).await?;
                        continue;
                    }
                },
                other => {
                    warn!(queue = %other, "delivery for unexpected queue, dropping");
                    client.ack(delivery.delivery_tag).await?;
                    continue;
                }
            };

            match outcome {
                Ok(()) => {
                    client.ack(delivery.delivery_tag).await?;
                    client
                        .publish_confirm(
                            exchanges::HEALTH_CHECK,
                            routing::HEARTBEAT_WORKER,
                            &lookout_bus::WorkerHeartbeat::alive(&self.name, now_ts()),
                            false,
                        )
                        .await?;
                }
                Err(e) => {
                    // Store trouble: requeue and let the outer loop restart
                    // us; the payload will be replayed.
                    error!(error = %e, "store write failed, requeueing");
                    client.nack(delivery.delivery_tag, true).await?;
                    return Err(BusError::Transport(format!("store failure: {e}")));
                }
            }
        }
    }
}
