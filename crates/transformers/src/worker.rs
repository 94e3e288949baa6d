//! The transformer worker loop.
//!
//! Consume raw data, load prior state (store on first sight, defaults if
//! the store recently failed), transform, apply state to the in-memory map
//! and the store, publish both derived payloads, ack, heartbeat. The state
//! map and store always reflect the raw message before anything is
//! published, so alerters only ever see a consistent "after" view.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{error, info, warn};

use lookout_bus::{
    exchanges, routing, BusClient, BusError, BusWorker, RawMessage, Transport, WorkerHeartbeat,
};
use lookout_core::{now_ts, Environment};
use lookout_store::RedisStore;

use crate::transformer::{Transformed, Transformer};

pub struct TransformerWorker<T: Transformer> {
    transformer: T,
    env: Environment,
    broker: Transport,
    states: HashMap<String, T::State>,
}

impl<T: Transformer> TransformerWorker<T> {
    pub fn new(transformer: T, env: Environment) -> Self {
        let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
        Self {
            transformer,
            env,
            broker,
            states: HashMap::new(),
        }
    }

    fn input_queue(&self) -> String {
        format!("{}_transformer_input", self.transformer.kind())
    }

    /// Prior state for an entity: the in-memory map, then the store (first
    /// sight only), then a fresh default if the store is degraded.
    async fn prior_state(
        &mut self,
        store: &mut Option<RedisStore>,
        entity_id: &str,
    ) -> Option<T::State> {
        if let Some(state) = self.states.get(entity_id) {
            return Some(state.clone());
        }

        if let Some(store) = store.as_mut() {
            if store.recently_failed() {
                warn!(entity_id, "store recently failed, starting from defaults");
                return None;
            }
            match store.load_state(self.transformer.kind(), entity_id).await {
                Ok(Some(state)) => {
                    info!(entity_id, "loaded prior state from store");
                    return Some(state);
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(entity_id, error = %e, "store load failed, starting from defaults");
                    return None;
                }
            }
        }
        None
    }
}

#[async_trait]
impl<T: Transformer> BusWorker for TransformerWorker<T> {
    fn name(&self) -> &str {
        self.transformer.name()
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;
        client.declare_exchange(exchanges::RAW_DATA).await?;
        client.declare_exchange(exchanges::STORE).await?;
        client.declare_exchange(exchanges::ALERT).await?;
        client.declare_exchange(exchanges::HEALTH_CHECK).await?;

        let queue = self.input_queue();
        let kind = self.transformer.kind();
        client.declare_queue(&queue).await?;
        client
            .bind(&queue, exchanges::RAW_DATA, &format!("monitor.{kind}.#"))
            .await?;
        // Prefetch scales with the configured publishing queue size.
        let prefetch = (self.env.transformer_queue_size / 5).max(1) as u32;
        client.consume(&queue, prefetch).await?;

        let mut store = match RedisStore::connect(
            &self.env.redis_host,
            self.env.redis_port,
            self.env.redis_db,
            &self.env.namespace,
        )
        .await
        {
            Ok(store) => Some(store),
            Err(e) => {
                // Degraded but functional: states start from defaults and
                // are not persisted until the store is back.
                warn!(error = %e, "store unavailable, running without persistence");
                None
            }
        };

        info!(worker = %self.transformer.name(), queue = %queue, "transformer consuming");
        loop {
            let delivery = client.next_delivery().await?;

            let raw: RawMessage = match serde_json::from_value(delivery.body.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    error!(error = %e, "malformed raw message, dropping");
                    client.ack(delivery.delivery_tag).await?;
                    continue;
                }
            };
            let meta = match &raw {
                RawMessage::Result(r) => r.meta_data.clone(),
                RawMessage::Error(e) => e.meta_data.clone(),
            };

            let prior = self.prior_state(&mut store, &meta.id).await;
            let Transformed { state, save, alert } =
                match self.transformer.transform(prior.as_ref(), &raw) {
                    Ok(out) => out,
                    Err(e) => {
                        error!(entity = %meta.id, error = %e, "transform failed, dropping");
                        client.ack(delivery.delivery_tag).await?;
                        continue;
                    }
                };

            // State map and store first, publishes second.
            self.states.insert(meta.id.clone(), state);
            if let Some(store) = store.as_mut() {
                if !save.fields.is_empty() {
                    if let Err(e) = store
                        .save_fields(kind, &meta.id, &meta.parent_id, &save.fields)
                        .await
                    {
                        warn!(entity = %meta.id, error = %e, "store write failed");
                    }
                }
            }

            let routing_key = routing::transformed(kind, &meta.parent_id);
            let published = async {
                client
                    .publish_confirm(exchanges::STORE, &routing_key, &save, true)
                    .await?;
                client
                    .publish_confirm(exchanges::ALERT, &routing_key, &alert, true)
                    .await?;
                Ok::<(), BusError>(())
            }
            .await;

            match published {
                Ok(()) => {
                    client.ack(delivery.delivery_tag).await?;
                    client
                        .publish_confirm(
                            exchanges::HEALTH_CHECK,
                            routing::HEARTBEAT_WORKER,
                            &WorkerHeartbeat::alive(self.transformer.name(), now_ts()),
                            false,
                        )
                        .await?;
                }
                Err(e) => {
                    // State and store already agree. Raise out of the round
                    // so the input is only redelivered once the restart
                    // loop has reconnected, never mid-loop against the
                    // unconfirmed state. No heartbeat for this round.
                    error!(error = %e, "derived payload publish failed, requeueing input");
                    client.nack(delivery.delivery_tag, true).await?;
                    return Err(e);
                }
            }
        }
    }
}
