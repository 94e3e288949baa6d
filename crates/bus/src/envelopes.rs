//! Application payloads carried over the bus, and the routing-key scheme.
//!
//! Bodies are UTF-8 JSON. Raw and transformed messages are tagged variants
//! (`{"result": …}` / `{"error": …}`); an unknown tag is a schema error and
//! is dropped at the consumer, never silently skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lookout_core::{EntityKind, MonitoringError};

// ── Exchanges ────────────────────────────────────────────────────────

pub mod exchanges {
    pub const RAW_DATA: &str = "raw_data";
    pub const ALERT: &str = "alert";
    pub const STORE: &str = "store";
    pub const CONFIG: &str = "config";
    pub const HEALTH_CHECK: &str = "health_check";
}

// ── Routing keys ─────────────────────────────────────────────────────

/// Routing keys follow `<producer>.<entity-kind>.<parent_id>`.
pub mod routing {
    use lookout_core::EntityKind;

    /// Monitor output on the raw-data exchange.
    pub fn raw(kind: EntityKind, parent_id: &str) -> String {
        format!("monitor.{kind}.{parent_id}")
    }

    /// Transformer output; the save payload travels under this key on the
    /// store exchange and the alert payload under the same key on the alert
    /// exchange.
    pub fn transformed(kind: EntityKind, parent_id: &str) -> String {
        format!("transformer.{kind}.{parent_id}")
    }

    /// Alert records emitted by alerters, on the alert exchange.
    pub fn alert(kind: EntityKind, parent_id: &str) -> String {
        format!("alerter.{kind}.{parent_id}")
    }

    /// `ComponentReset` control alerts from managers, on the alert exchange.
    pub fn component_reset(parent_id: &str) -> String {
        format!("manager.component_reset.{parent_id}")
    }

    pub const HEARTBEAT_WORKER: &str = "heartbeat.worker";
    pub const HEARTBEAT_MANAGER: &str = "heartbeat.manager";
    pub const PING: &str = "ping";
}

// ── Raw-data envelope ────────────────────────────────────────────────

/// Identity metadata attached to every raw observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub monitor_name: String,
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    pub parent_id: String,
    /// Observation time, f64 epoch seconds.
    pub time: f64,
}

/// A raw observation as published by a monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMessage {
    Result(RawResult),
    Error(RawError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub meta_data: MetaData,
    /// Flat metric map.
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawError {
    pub meta_data: MetaData,
    #[serde(flatten)]
    pub error: MonitoringError,
}

// ── Transformed envelopes ────────────────────────────────────────────

/// A `{previous, current}` pair for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDelta {
    pub previous: serde_json::Value,
    pub current: serde_json::Value,
}

impl ValueDelta {
    pub fn new(previous: serde_json::Value, current: serde_json::Value) -> Self {
        Self { previous, current }
    }
}

/// Transformer output on the alerting stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformedMessage {
    Result(TransformedResult),
    Error(TransformedError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedResult {
    pub meta_data: TransformedMeta,
    pub data: BTreeMap<String, ValueDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedError {
    pub meta_data: TransformedMeta,
    #[serde(flatten)]
    pub error: MonitoringError,
    /// Transition fields synthesized for this error (e.g. `went_down_at`).
    #[serde(default)]
    pub data: BTreeMap<String, ValueDelta>,
}

/// Identity metadata on the transformed streams; `last_monitored` replaces
/// the raw `time` once the state has absorbed the observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedMeta {
    pub monitor_name: String,
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub last_monitored: Option<f64>,
}

/// Transformer output on the store stream: the flattened current values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePayload {
    pub meta_data: TransformedMeta,
    pub fields: BTreeMap<String, serde_json::Value>,
}

// ── Health-check envelopes ───────────────────────────────────────────

/// Liveness heartbeat emitted by a worker after a successful round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub component_name: String,
    pub is_alive: bool,
    pub timestamp: f64,
}

impl WorkerHeartbeat {
    pub fn alive(component_name: &str, timestamp: f64) -> Self {
        Self {
            component_name: component_name.to_string(),
            is_alive: true,
            timestamp,
        }
    }
}

/// Aggregate heartbeat a manager publishes in answer to a ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerHeartbeat {
    pub component_name: String,
    pub running: Vec<String>,
    pub dead: Vec<String>,
    pub timestamp: f64,
}

// ── Config envelope ──────────────────────────────────────────────────

/// A parsed config document from the fan-out, `section → {option: value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Path relative to the watched root, `/`-separated.
    pub path: String,
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::ErrorCode;

    #[test]
    fn raw_result_has_the_wire_shape() {
        let msg = RawMessage::Result(RawResult {
            meta_data: MetaData {
                monitor_name: "system-monitor-1".into(),
                kind: EntityKind::System,
                id: "sys_1".into(),
                name: "host-a".into(),
                parent_id: "chain_1".into(),
                time: 1000.0,
            },
            data: serde_json::json!({"process_cpu_seconds_total": 100.0}),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("result").is_some());
        assert_eq!(json["result"]["meta_data"]["monitor_name"], "system-monitor-1");
        assert_eq!(json["result"]["data"]["process_cpu_seconds_total"], 100.0);
    }

    #[test]
    fn raw_error_flattens_code_and_message() {
        let msg = RawMessage::Error(RawError {
            meta_data: MetaData {
                monitor_name: "system-monitor-1".into(),
                kind: EntityKind::System,
                id: "sys_1".into(),
                name: "host-a".into(),
                parent_id: "chain_1".into(),
                time: 1120.0,
            },
            error: MonitoringError::node_is_down("host-a"),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["error"]["code"], 5009);
        assert!(json["error"]["message"].as_str().unwrap().contains("host-a"));

        let back: RawMessage = serde_json::from_value(json).unwrap();
        match back {
            RawMessage::Error(e) => assert_eq!(e.error.code, ErrorCode::NodeIsDown),
            other => panic!("expected error variant, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_a_schema_error() {
        let json = serde_json::json!({"neither": {}});
        assert!(serde_json::from_value::<RawMessage>(json).is_err());
    }

    #[test]
    fn routing_keys_follow_producer_kind_parent() {
        assert_eq!(
            routing::raw(EntityKind::System, "chain_1"),
            "monitor.system.chain_1"
        );
        assert_eq!(
            routing::alert(EntityKind::ChainlinkContract, "chain_9"),
            "alerter.chainlink_contract.chain_9"
        );
    }
}
