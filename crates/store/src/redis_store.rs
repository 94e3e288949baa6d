//! Typed get/set over Redis with a degradation predicate.
//!
//! Values are stored as JSON-encoded strings, one key per field. After any
//! command failure the store reports `recently_failed()` for a cooldown
//! window so dependent code (transformers loading first-sight state) can
//! fall back to fresh defaults instead of blocking on a sick store.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use lookout_core::EntityKind;

use crate::error::StoreError;
use crate::keys::{entity_index_key, field_key, fields_index_key};

/// How long after a failure the store keeps reporting `recently_failed`.
const FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

/// Tracks the "recently failed, skip me" cooldown.
#[derive(Debug)]
struct FailureWindow {
    cooldown: Duration,
    last_failure: Option<Instant>,
}

impl Default for FailureWindow {
    fn default() -> Self {
        Self::with_cooldown(FAILURE_COOLDOWN)
    }
}

impl FailureWindow {
    fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_failure: None,
        }
    }

    fn is_open(&self) -> bool {
        self.last_failure
            .map(|at| at.elapsed() < self.cooldown)
            .unwrap_or(false)
    }

    fn mark_failed(&mut self) {
        self.last_failure = Some(Instant::now());
    }

    fn mark_ok(&mut self) {
        self.last_failure = None;
    }
}

/// A connected store handle. Owned by exactly one worker; never shared
/// across processes.
pub struct RedisStore {
    namespace: String,
    connection: MultiplexedConnection,
    failures: FailureWindow,
}

impl RedisStore {
    /// Connect to Redis and select the configured logical database.
    pub async fn connect(
        host: &str,
        port: u16,
        db: i64,
        namespace: &str,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(format!("redis://{host}:{port}/{db}"))?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            namespace: namespace.to_string(),
            connection,
            failures: FailureWindow::default(),
        })
    }

    /// Whether the store failed recently; callers should skip it and
    /// degrade gracefully while this is true.
    pub fn recently_failed(&self) -> bool {
        self.failures.is_open()
    }

    fn note_failure(&mut self) {
        self.failures.mark_failed();
    }

    fn note_success(&mut self) {
        self.failures.mark_ok();
    }

    /// Write one entity's fields write-through, maintaining the purge
    /// indexes.
    pub async fn save_fields(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
        parent_id: &str,
        fields: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (field, value) in fields {
            let key = field_key(&self.namespace, kind, entity_id, field);
            pipe.set(key, value.to_string()).ignore();
            pipe.sadd(
                fields_index_key(&self.namespace, kind, entity_id),
                field.as_str(),
            )
            .ignore();
        }
        pipe.sadd(
            entity_index_key(&self.namespace, parent_id),
            format!("{kind}:{entity_id}"),
        )
        .ignore();

        match pipe.query_async::<()>(&mut self.connection).await {
            Ok(()) => {
                self.note_success();
                debug!(kind = %kind, entity_id, n = fields.len(), "saved fields");
                Ok(())
            }
            Err(e) => {
                self.note_failure();
                Err(e.into())
            }
        }
    }

    /// Read every persisted field of an entity as a JSON map.
    pub async fn load_fields(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, StoreError> {
        let index = fields_index_key(&self.namespace, kind, entity_id);
        let field_names: Vec<String> = match self.connection.smembers(&index).await {
            Ok(names) => names,
            Err(e) => {
                self.note_failure();
                return Err(e.into());
            }
        };

        let mut fields = BTreeMap::new();
        if field_names.is_empty() {
            self.note_success();
            return Ok(fields);
        }

        let keys: Vec<String> = field_names
            .iter()
            .map(|f| field_key(&self.namespace, kind, entity_id, f))
            .collect();
        let values: Vec<Option<String>> = match self.connection.mget(&keys).await {
            Ok(values) => values,
            Err(e) => {
                self.note_failure();
                return Err(e.into());
            }
        };

        for (name, value) in field_names.into_iter().zip(values) {
            if let Some(raw) = value {
                fields.insert(name, serde_json::from_str(&raw)?);
            }
        }
        self.note_success();
        Ok(fields)
    }

    /// Load an entity's persisted state record, deserialized from its field
    /// map. Missing fields fall back to the record's defaults.
    pub async fn load_state<T: DeserializeOwned>(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<T>, StoreError> {
        let fields = self.load_fields(kind, entity_id).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let map = serde_json::Value::Object(fields.into_iter().collect());
        Ok(Some(serde_json::from_value(map)?))
    }

    /// Delete one entity's slice (all fields plus its field index).
    pub async fn purge_entity(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<u64, StoreError> {
        let index = fields_index_key(&self.namespace, kind, entity_id);
        let field_names: Vec<String> = match self.connection.smembers(&index).await {
            Ok(names) => names,
            Err(e) => {
                self.note_failure();
                return Err(e.into());
            }
        };

        let mut keys: Vec<String> = field_names
            .iter()
            .map(|f| field_key(&self.namespace, kind, entity_id, f))
            .collect();
        keys.push(index);

        match self.connection.del::<_, u64>(keys).await {
            Ok(deleted) => {
                self.note_success();
                Ok(deleted)
            }
            Err(e) => {
                self.note_failure();
                Err(e.into())
            }
        }
    }

    /// Purge every entity slice recorded under a parent chain. Used when a
    /// `ComponentReset` arrives for a child that owns that chain's state.
    pub async fn purge_parent(&mut self, parent_id: &str) -> Result<u64, StoreError> {
        let index = entity_index_key(&self.namespace, parent_id);
        let members: Vec<String> = match self.connection.smembers(&index).await {
            Ok(members) => members,
            Err(e) => {
                self.note_failure();
                return Err(e.into());
            }
        };

        let mut deleted = 0;
        for member in members {
            let Some((kind_str, entity_id)) = member.split_once(':') else {
                warn!(member, "malformed entity index member");
                continue;
            };
            let Some(kind) = parse_kind(kind_str) else {
                warn!(member, "unknown entity kind in index");
                continue;
            };
            deleted += self.purge_entity(kind, entity_id).await?;
        }
        match self.connection.del::<_, ()>(index).await {
            Ok(()) => Ok(deleted),
            Err(e) => {
                self.note_failure();
                Err(e.into())
            }
        }
    }
}

fn parse_kind(kind: &str) -> Option<EntityKind> {
    match kind {
        "system" => Some(EntityKind::System),
        "repository" => Some(EntityKind::Repository),
        "chainlink_node" => Some(EntityKind::ChainlinkNode),
        "chainlink_contract" => Some(EntityKind::ChainlinkContract),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kind_matches_wire_names() {
        assert_eq!(parse_kind("system"), Some(EntityKind::System));
        assert_eq!(
            parse_kind("chainlink_contract"),
            Some(EntityKind::ChainlinkContract)
        );
        assert_eq!(parse_kind("bogus"), None);
    }

    #[test]
    fn failure_window_opens_on_failure_and_closes_over_time() {
        let mut window = FailureWindow::with_cooldown(Duration::from_millis(20));
        assert!(!window.is_open());

        window.mark_failed();
        assert!(window.is_open());

        // A success inside the window clears it immediately.
        window.mark_ok();
        assert!(!window.is_open());

        // Otherwise the window expires on its own.
        window.mark_failed();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!window.is_open());
    }
}
