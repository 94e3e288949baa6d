//! Chainlink node monitor: polls the node's own Prometheus endpoints.
//!
//! A node config may list several endpoints (active/standby pairs); they
//! are tried in order and the first page that parses wins. All endpoints
//! failing is the node's downtime signal.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use lookout_bus::{exchanges, routing, BusClient, MetaData, RawError, RawMessage, RawResult};
use lookout_core::{now_ts, EntityId, EntityKind, MonitoringError};

use crate::error::MonitorError;
use crate::monitor::{Monitor, RoundStatus};
use crate::scrape::{fetch_metrics, find_sample, sample_value};

/// Metrics lifted from the node's page; absent ones stay null so the
/// transformer can tell "not exported" from zero.
const NODE_METRICS: &[&str] = &[
    "head_tracker_current_head",
    "head_tracker_heads_received_total",
    "max_unconfirmed_blocks",
    "unconfirmed_transactions",
    "process_start_time_seconds",
    "eth_balance",
];

pub struct ChainlinkNodeMonitor {
    name: String,
    entity: EntityId,
    prometheus_urls: Vec<String>,
    period: Duration,
    http: reqwest::Client,
}

impl ChainlinkNodeMonitor {
    pub fn new(
        name: impl Into<String>,
        entity: EntityId,
        prometheus_urls: Vec<String>,
        period: Duration,
    ) -> Result<Self, MonitorError> {
        let name = name.into();
        if prometheus_urls.is_empty() {
            return Err(MonitorError::NotEnoughSources {
                monitor: name,
                field: "prometheus_urls".into(),
            });
        }
        Ok(Self {
            name,
            entity,
            prometheus_urls,
            period,
            http: reqwest::Client::new(),
        })
    }

    fn meta(&self, time: f64) -> MetaData {
        MetaData {
            monitor_name: self.name.clone(),
            kind: EntityKind::ChainlinkNode,
            id: self.entity.id.clone(),
            name: self.entity.name.clone(),
            parent_id: self.entity.parent_id.clone(),
            time,
        }
    }

    /// Try each endpoint in order; only one node of a pair is live at a
    /// time, so any reachable page is authoritative.
    async fn take_reading(&self) -> Result<serde_json::Value, MonitorError> {
        let mut last_error: Option<MonitorError> = None;
        for url in &self.prometheus_urls {
            match fetch_metrics(&self.http, url).await {
                Ok(scrape) => {
                    let mut data = serde_json::Map::new();
                    for metric in NODE_METRICS {
                        let value = find_sample(&scrape, metric).and_then(sample_value);
                        data.insert((*metric).to_string(), json!(value));
                    }
                    return Ok(serde_json::Value::Object(data));
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "node endpoint not reachable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            MonitoringError::node_is_down(&self.entity.name).into()
        }))
    }
}

#[async_trait]
impl Monitor for ChainlinkNodeMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn tick(&mut self, client: &BusClient) -> Result<RoundStatus, MonitorError> {
        let routing_key = routing::raw(EntityKind::ChainlinkNode, &self.entity.parent_id);

        let message = match self.take_reading().await {
            Ok(data) => RawMessage::Result(RawResult {
                meta_data: self.meta(now_ts()),
                data,
            }),
            Err(e) => RawMessage::Error(RawError {
                meta_data: self.meta(now_ts()),
                error: e.as_wire_error(&self.entity.name),
            }),
        };

        client
            .publish_confirm(exchanges::RAW_DATA, &routing_key, &message, true)
            .await?;
        Ok(RoundStatus::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_endpoints_is_a_construction_error() {
        let err = ChainlinkNodeMonitor::new(
            "node-monitor-1",
            EntityId::new(EntityKind::ChainlinkNode, "node_1", "ocr-node", "chain_1"),
            Vec::new(),
            Duration::from_secs(30),
        )
        .unwrap_err();
        assert!(err.to_string().contains("prometheus_urls"));
    }
}
