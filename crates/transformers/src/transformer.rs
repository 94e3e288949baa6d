//! The transformer contract and shared helpers.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use lookout_bus::{MetaData, RawMessage, SavePayload, TransformedMessage, TransformedMeta, ValueDelta};
use lookout_core::EntityKind;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The message does not have the shape this transformer expects.
    /// Handled by acking and dropping the input.
    #[error("schema error: {0}")]
    Schema(String),
}

/// Output of one transformation: the new state plus both derived payloads.
#[derive(Debug, Clone)]
pub struct Transformed<S> {
    pub state: S,
    pub save: SavePayload,
    pub alert: TransformedMessage,
}

/// A per-kind transformation. `transform` is pure given
/// `(prior_state, raw_message)`; all I/O lives in the worker loop.
pub trait Transformer: Send {
    type State: Clone + Default + Serialize + DeserializeOwned + Send;

    fn name(&self) -> &str;
    fn kind(&self) -> EntityKind;

    fn transform(
        &self,
        prior: Option<&Self::State>,
        raw: &RawMessage,
    ) -> Result<Transformed<Self::State>, TransformError>;
}

/// Carry raw meta over to the transformed streams, with `last_monitored`
/// replacing the observation time.
pub fn transformed_meta(meta: &MetaData, last_monitored: Option<f64>) -> TransformedMeta {
    TransformedMeta {
        monitor_name: meta.monitor_name.clone(),
        kind: meta.kind,
        id: meta.id.clone(),
        name: meta.name.clone(),
        parent_id: meta.parent_id.clone(),
        last_monitored,
    }
}

/// A serializable state record viewed as its flat field map.
pub fn state_fields<S: Serialize>(state: &S) -> Result<BTreeMap<String, serde_json::Value>, TransformError> {
    match serde_json::to_value(state) {
        Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(other) => Err(TransformError::Schema(format!(
            "state serialized to {other:?}, expected an object"
        ))),
        Err(e) => Err(TransformError::Schema(e.to_string())),
    }
}

/// Build `{previous, current}` pairs for every field of the new state,
/// except bookkeeping fields that live in the meta instead.
pub fn field_deltas(
    previous: Option<&BTreeMap<String, serde_json::Value>>,
    current: &BTreeMap<String, serde_json::Value>,
    skip: &[&str],
) -> BTreeMap<String, ValueDelta> {
    let mut deltas = BTreeMap::new();
    for (field, value) in current {
        if skip.contains(&field.as_str()) {
            continue;
        }
        let prior = previous
            .and_then(|p| p.get(field))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        deltas.insert(field.clone(), ValueDelta::new(prior, value.clone()));
    }
    deltas
}

/// Rate between two cumulative readings, `None` until both ends exist.
pub fn rate(
    previous_total: Option<f64>,
    current_total: Option<f64>,
    t_prev: Option<f64>,
    t_now: f64,
) -> Option<f64> {
    let previous_total = previous_total?;
    let current_total = current_total?;
    let t_prev = t_prev?;
    let elapsed = t_now - t_prev;
    (elapsed > 0.0).then(|| (current_total - previous_total) / elapsed)
}

/// Plain difference of two cumulative readings, `None` until both exist.
pub fn interval_delta(previous_total: Option<f64>, current_total: Option<f64>) -> Option<f64> {
    Some(current_total? - previous_total?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_needs_both_ends_and_elapsed_time() {
        assert_eq!(rate(None, Some(1600.0), None, 1060.0), None);
        assert_eq!(rate(Some(1000.0), Some(1600.0), Some(1000.0), 1060.0), Some(10.0));
        // Zero elapsed time yields nothing rather than infinity.
        assert_eq!(rate(Some(1.0), Some(2.0), Some(1060.0), 1060.0), None);
    }

    #[test]
    fn deltas_null_previous_on_first_sight() {
        let mut current = BTreeMap::new();
        current.insert("x".to_string(), serde_json::json!(5.0));
        current.insert("last_monitored".to_string(), serde_json::json!(1000.0));

        let deltas = field_deltas(None, &current, &["last_monitored"]);
        assert!(!deltas.contains_key("last_monitored"));
        assert_eq!(deltas["x"].previous, serde_json::Value::Null);
        assert_eq!(deltas["x"].current, serde_json::json!(5.0));
    }
}
