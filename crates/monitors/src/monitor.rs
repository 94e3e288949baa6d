//! The periodic monitor loop.
//!
//! A [`Monitor`] takes one reading per tick; [`MonitorWorker`] wraps it in
//! the standard worker shape: connect, declare, tick, heartbeat on a clean
//! round, pace, repeat. Connection errors bubble to the restart loop;
//! everything else is confined to the round that raised it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use lookout_bus::{exchanges, routing, BusClient, BusError, BusWorker, Transport, WorkerHeartbeat};
use lookout_core::now_ts;

use crate::error::MonitorError;

/// Outcome of one monitoring round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    /// Fully non-erroring round: a heartbeat is due.
    Clean,
    /// The round ran but something went wrong enough that no heartbeat
    /// should be emitted (the error payload already went out).
    Degraded,
}

/// One monitorable source, polled on a fixed period.
#[async_trait]
pub trait Monitor: Send {
    fn name(&self) -> &str;
    fn period(&self) -> Duration;

    /// Take one reading and publish it through `client`.
    async fn tick(&mut self, client: &BusClient) -> Result<RoundStatus, MonitorError>;
}

/// Standard worker harness around a [`Monitor`].
pub struct MonitorWorker<M> {
    monitor: M,
    broker: Transport,
}

impl<M: Monitor> MonitorWorker<M> {
    pub fn new(monitor: M, broker: Transport) -> Self {
        Self { monitor, broker }
    }
}

#[async_trait]
impl<M: Monitor> BusWorker for MonitorWorker<M> {
    fn name(&self) -> &str {
        self.monitor.name()
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;
        client.declare_exchange(exchanges::RAW_DATA).await?;
        client.declare_exchange(exchanges::HEALTH_CHECK).await?;
        info!(monitor = %self.monitor.name(), period = ?self.monitor.period(), "monitor loop starting");

        loop {
            match self.monitor.tick(&client).await {
                Ok(RoundStatus::Clean) => {
                    client
                        .publish_confirm(
                            exchanges::HEALTH_CHECK,
                            routing::HEARTBEAT_WORKER,
                            &WorkerHeartbeat::alive(self.monitor.name(), now_ts()),
                            false,
                        )
                        .await?;
                }
                Ok(RoundStatus::Degraded) => {
                    // Error payload already published; no heartbeat.
                }
                Err(MonitorError::Bus(e)) if e.is_connection_error() => return Err(e),
                Err(MonitorError::Bus(e @ BusError::NotDelivered { .. })) => {
                    // The message stays unsent; log and try again next
                    // round rather than tearing the worker down.
                    error!(monitor = %self.monitor.name(), error = %e, "publish not delivered");
                }
                Err(e) => {
                    error!(monitor = %self.monitor.name(), error = %e, "monitoring round failed");
                }
            }

            client.pace(self.monitor.period()).await;
        }
    }
}
