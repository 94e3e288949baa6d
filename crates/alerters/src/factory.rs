//! Per-chain alerts-config management.
//!
//! The config fan-out delivers one flat document per chain: numbered
//! sub-records, each naming a metric ruleset and carrying the chain's
//! `parent_id`. Every sub-record must agree on the parent id; a mismatch
//! rejects the document and leaves the existing config untouched.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use lookout_core::ErrorCode;

/// A flat config document: sub-record index → `{option: value}`.
pub type FlatConfig = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Error, PartialEq)]
pub enum FactoryError {
    #[error("sub-records carry different parent ids")]
    ParentIdMismatch,

    #[error("config has no sub-records")]
    Empty,

    #[error("sub-record is missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' has invalid value '{value}'")]
    InvalidValue { field: String, value: String },
}

impl FactoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FactoryError::ParentIdMismatch => ErrorCode::ParentIdMismatch,
            _ => ErrorCode::ReceivedUnexpectedData,
        }
    }
}

/// Built from a validated flat config; one value per chain.
pub trait FromFlatConfig: Sized {
    /// `by_name` indexes the sub-records by their `name` field.
    fn from_flat(
        parent_id: &str,
        by_name: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self, FactoryError>;
}

/// Holds the alert configs, indexed by chain name; each chain has exactly
/// one config.
#[derive(Debug)]
pub struct AlertsConfigFactory<C> {
    configs: HashMap<String, C>,
}

impl<C> Default for AlertsConfigFactory<C> {
    fn default() -> Self {
        Self {
            configs: HashMap::new(),
        }
    }
}

impl<C: FromFlatConfig> AlertsConfigFactory<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and install a chain's config. Returns whether an existing
    /// config was replaced, plus the chain's parent id (callers use it to
    /// reset downstream metric state).
    pub fn add(&mut self, chain_name: &str, sent: &FlatConfig) -> Result<(bool, String), FactoryError> {
        let mut records = sent.values();
        let first = records.next().ok_or(FactoryError::Empty)?;
        let parent_id = first
            .get("parent_id")
            .cloned()
            .ok_or_else(|| FactoryError::MissingField("parent_id".into()))?;

        for record in sent.values() {
            if record.get("parent_id") != Some(&parent_id) {
                return Err(FactoryError::ParentIdMismatch);
            }
        }

        let mut by_name = BTreeMap::new();
        for record in sent.values() {
            let name = record
                .get("name")
                .cloned()
                .ok_or_else(|| FactoryError::MissingField("name".into()))?;
            by_name.insert(name, record.clone());
        }

        let config = C::from_flat(&parent_id, &by_name)?;
        let updated = self.configs.insert(chain_name.to_string(), config).is_some();
        Ok((updated, parent_id))
    }

    /// Drop a chain's ruleset; later messages for that chain are ignored.
    pub fn remove(&mut self, chain_name: &str) {
        self.configs.remove(chain_name);
    }

    pub fn get(&self, chain_name: &str) -> Option<&C> {
        self.configs.get(chain_name)
    }

    /// Config for a given parent id, however the chain is named.
    pub fn get_by_parent(&self, parent_id: &str) -> Option<&C>
    where
        C: HasParentId,
    {
        self.configs.values().find(|c| c.parent_id() == parent_id)
    }

    pub fn exists(&self, chain_name: &str) -> bool {
        self.configs.contains_key(chain_name)
    }
}

/// Configs that remember which chain they belong to.
pub trait HasParentId {
    fn parent_id(&self) -> &str;
}

// ── Flat-field parse helpers shared by the concrete configs ──────────

pub(crate) fn flat_f64(
    record: &BTreeMap<String, String>,
    field: &str,
) -> Result<Option<f64>, FactoryError> {
    match record.get(field) {
        None => Ok(None),
        Some(raw) if raw.is_empty() || raw == "None" => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| FactoryError::InvalidValue {
                field: field.to_string(),
                value: raw.clone(),
            }),
    }
}

pub(crate) fn flat_bool(record: &BTreeMap<String, String>, field: &str) -> bool {
    record
        .get(field)
        .map(|raw| matches!(raw.to_lowercase().as_str(), "true" | "yes" | "y" | "1"))
        .unwrap_or(false)
}
