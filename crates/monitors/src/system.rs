//! System monitor: polls a node-exporter style metrics endpoint.

use std::time::Duration;

use async_trait::async_trait;
use prometheus_parse::Scrape;
use serde_json::json;
use tracing::debug;

use lookout_bus::{exchanges, routing, BusClient, MetaData, RawError, RawMessage, RawResult};
use lookout_core::{now_ts, EntityId, EntityKind};

use crate::error::MonitorError;
use crate::monitor::{Monitor, RoundStatus};
use crate::scrape::{fetch_metrics, require_value, sum_values};

pub struct SystemMonitor {
    name: String,
    entity: EntityId,
    metrics_url: String,
    period: Duration,
    http: reqwest::Client,
}

impl SystemMonitor {
    pub fn new(
        name: impl Into<String>,
        entity: EntityId,
        metrics_url: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            entity,
            metrics_url: metrics_url.into(),
            period,
            http: reqwest::Client::new(),
        }
    }

    fn meta(&self, time: f64) -> MetaData {
        MetaData {
            monitor_name: self.name.clone(),
            kind: EntityKind::System,
            id: self.entity.id.clone(),
            name: self.entity.name.clone(),
            parent_id: self.entity.parent_id.clone(),
            time,
        }
    }

    /// Shape a scrape into the flat metric map carried by the raw envelope.
    fn shape(&self, scrape: &Scrape) -> Result<serde_json::Value, MonitorError> {
        let cpu_count = scrape
            .samples
            .iter()
            .filter(|s| {
                s.metric == "node_cpu_seconds_total"
                    && s.labels.get("mode") == Some("idle")
            })
            .count()
            .max(1) as f64;

        let load1 = require_value(scrape, "node_load1")?;
        let mem_total = require_value(scrape, "node_memory_MemTotal_bytes")?;
        let mem_available = require_value(scrape, "node_memory_MemAvailable_bytes")?;

        // Root filesystem usage; other mounts are the deployer's business.
        let fs_size = sum_values(scrape, "node_filesystem_size_bytes", None);
        let fs_avail = sum_values(scrape, "node_filesystem_avail_bytes", None);
        let storage_usage = match (fs_size, fs_avail) {
            (Some(size), Some(avail)) if size > 0.0 => Some(100.0 * (1.0 - avail / size)),
            _ => None,
        };

        Ok(json!({
            "process_cpu_seconds_total": require_value(scrape, "process_cpu_seconds_total")?,
            "process_memory_usage": require_value(scrape, "process_resident_memory_bytes")?,
            "virtual_memory_usage": require_value(scrape, "process_virtual_memory_bytes")?,
            "open_file_descriptors": require_value(scrape, "process_open_fds")?,
            "system_cpu_usage": 100.0 * load1 / cpu_count,
            "system_ram_usage": 100.0 * (1.0 - mem_available / mem_total),
            "system_storage_usage": storage_usage,
            "network_transmit_bytes_total": sum_values(scrape, "node_network_transmit_bytes_total", Some("lo")),
            "network_receive_bytes_total": sum_values(scrape, "node_network_receive_bytes_total", Some("lo")),
            "disk_io_time_seconds_total": sum_values(scrape, "node_disk_io_time_seconds_total", None),
        }))
    }
}

#[async_trait]
impl Monitor for SystemMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn tick(&mut self, client: &BusClient) -> Result<RoundStatus, MonitorError> {
        let routing_key = routing::raw(EntityKind::System, &self.entity.parent_id);

        let message = match fetch_metrics(&self.http, &self.metrics_url).await {
            Ok(scrape) => match self.shape(&scrape) {
                Ok(data) => {
                    debug!(monitor = %self.name, "reading taken");
                    RawMessage::Result(RawResult {
                        meta_data: self.meta(now_ts()),
                        data,
                    })
                }
                Err(e) => RawMessage::Error(RawError {
                    meta_data: self.meta(now_ts()),
                    error: e.as_wire_error(&self.metrics_url),
                }),
            },
            Err(e) => RawMessage::Error(RawError {
                meta_data: self.meta(now_ts()),
                error: e.as_wire_error(&self.metrics_url),
            }),
        };

        client
            .publish_confirm(exchanges::RAW_DATA, &routing_key, &message, true)
            .await?;
        Ok(RoundStatus::Clean)
    }
}
