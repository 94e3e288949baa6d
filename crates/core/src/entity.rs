//! Monitorable entities and their mutable state records.
//!
//! Every observed unit (system, repository, node, chain) has an identity
//! `{kind, id, name, parent_id}` where `parent_id` ties it to a chain.
//! State records are created lazily on first observation and mutated only
//! by the owning transformer, in raw-message arrival order.

use serde::{Deserialize, Serialize};

/// The kind of a monitorable entity. Doubles as the `entity_kind` segment of
/// store keys and routing keys, so the serialized names are a wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    System,
    Repository,
    ChainlinkNode,
    ChainlinkContract,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::System => "system",
            EntityKind::Repository => "repository",
            EntityKind::ChainlinkNode => "chainlink_node",
            EntityKind::ChainlinkContract => "chainlink_contract",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract identity of a monitorable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    /// The chain/realm this entity belongs to.
    pub parent_id: String,
}

impl EntityId {
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.into(),
        }
    }
}

// ── System state ─────────────────────────────────────────────────────

/// Mutable state of a monitored host, fed by node-exporter style scrapes.
///
/// Flat fields mirror the raw metric map; `*_per_second` and `*_in_interval`
/// fields are synthesized from two consecutive readings and are `None` until
/// the second observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub process_cpu_seconds_total: Option<f64>,
    pub process_memory_usage: Option<f64>,
    pub virtual_memory_usage: Option<f64>,
    pub open_file_descriptors: Option<f64>,
    pub system_cpu_usage: Option<f64>,
    pub system_ram_usage: Option<f64>,
    pub system_storage_usage: Option<f64>,
    pub network_transmit_bytes_total: Option<f64>,
    pub network_receive_bytes_total: Option<f64>,
    pub disk_io_time_seconds_total: Option<f64>,
    pub network_transmit_bytes_per_second: Option<f64>,
    pub network_receive_bytes_per_second: Option<f64>,
    pub disk_io_time_seconds_in_interval: Option<f64>,
    /// Set to the observation time of the first downtime error, preserved
    /// across repeated downtime errors, cleared on the next success.
    pub went_down_at: Option<f64>,
    pub last_monitored: Option<f64>,
}

impl SystemState {
    /// Record a downtime error observed at `at`, preserving an existing
    /// downtime start.
    pub fn mark_down(&mut self, at: f64) -> f64 {
        *self.went_down_at.get_or_insert(at)
    }

    /// Clear the downtime marker after a successful observation.
    pub fn mark_up(&mut self) {
        self.went_down_at = None;
    }
}

// ── Repository state ─────────────────────────────────────────────────

/// Mutable state of a watched release feed (source or container registry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoState {
    pub no_of_releases: Option<u64>,
    pub last_monitored: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(EntityKind::System.as_str(), "system");
        assert_eq!(EntityKind::ChainlinkContract.as_str(), "chainlink_contract");
        let json = serde_json::to_string(&EntityKind::ChainlinkNode).unwrap();
        assert_eq!(json, "\"chainlink_node\"");
    }

    #[test]
    fn went_down_at_set_once_and_cleared() {
        let mut state = SystemState::default();
        assert_eq!(state.mark_down(1120.0), 1120.0);
        // A second downtime error keeps the original start.
        assert_eq!(state.mark_down(1180.0), 1120.0);
        assert_eq!(state.went_down_at, Some(1120.0));
        state.mark_up();
        assert_eq!(state.went_down_at, None);
    }

    #[test]
    fn system_state_default_is_all_none() {
        let state = SystemState::default();
        assert!(state.process_cpu_seconds_total.is_none());
        assert!(state.network_transmit_bytes_per_second.is_none());
        assert!(state.went_down_at.is_none());
        assert!(state.last_monitored.is_none());
    }
}
