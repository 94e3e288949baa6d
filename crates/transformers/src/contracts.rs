//! Contracts transformer: per-operator observer output to per-proxy
//! `{previous, current}` snapshots.
//!
//! The observer already did the heavy lifting (round walks, watermarks);
//! this stage remembers the last snapshot per proxy so the alerter can see
//! both sides of a transition (e.g. `lastRoundObserved` standing still).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lookout_bus::{
    RawMessage, SavePayload, TransformedError, TransformedMessage, TransformedResult, ValueDelta,
};
use lookout_core::EntityKind;

use crate::transformer::{transformed_meta, TransformError, Transformed, Transformer};

/// Per-operator state: the last full snapshot of each proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractsState {
    #[serde(default)]
    pub proxies: BTreeMap<String, serde_json::Value>,
    pub last_monitored: Option<f64>,
}

pub struct ContractsTransformer {
    name: String,
}

impl ContractsTransformer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Transformer for ContractsTransformer {
    type State = ContractsState;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        EntityKind::ChainlinkContract
    }

    fn transform(
        &self,
        prior: Option<&ContractsState>,
        raw: &RawMessage,
    ) -> Result<Transformed<ContractsState>, TransformError> {
        match raw {
            RawMessage::Result(result) => {
                let proxies = result.data.as_object().ok_or_else(|| {
                    TransformError::Schema("contracts result data is not an object".into())
                })?;

                let mut state = ContractsState {
                    proxies: BTreeMap::new(),
                    last_monitored: Some(result.meta_data.time),
                };
                let mut deltas = BTreeMap::new();
                for (proxy, observation) in proxies {
                    let previous = prior
                        .and_then(|s| s.proxies.get(proxy))
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    deltas.insert(
                        proxy.clone(),
                        ValueDelta::new(previous, observation.clone()),
                    );
                    state.proxies.insert(proxy.clone(), observation.clone());
                }

                let mut fields = BTreeMap::new();
                fields.insert(
                    "proxies".to_string(),
                    serde_json::to_value(&state.proxies)
                        .map_err(|e| TransformError::Schema(e.to_string()))?,
                );
                fields.insert(
                    "last_monitored".to_string(),
                    serde_json::json!(state.last_monitored),
                );

                let meta = transformed_meta(&result.meta_data, state.last_monitored);
                Ok(Transformed {
                    save: SavePayload {
                        meta_data: meta.clone(),
                        fields,
                    },
                    alert: TransformedMessage::Result(TransformedResult {
                        meta_data: meta,
                        data: deltas,
                    }),
                    state,
                })
            }

            RawMessage::Error(error) => {
                let state = prior.cloned().unwrap_or_default();
                let meta = transformed_meta(&error.meta_data, state.last_monitored);
                Ok(Transformed {
                    save: SavePayload {
                        meta_data: meta.clone(),
                        fields: BTreeMap::new(),
                    },
                    alert: TransformedMessage::Error(TransformedError {
                        meta_data: meta,
                        error: error.error.clone(),
                        data: BTreeMap::new(),
                    }),
                    state,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_bus::{MetaData, RawResult};
    use serde_json::json;

    fn raw(time: f64, last_round: u64) -> RawMessage {
        RawMessage::Result(RawResult {
            meta_data: MetaData {
                monitor_name: "contracts-monitor (chain_1)".into(),
                kind: EntityKind::ChainlinkContract,
                id: "node_1".into(),
                name: "ocr-node".into(),
                parent_id: "chain_1".into(),
                time,
            },
            data: json!({
                "0x00000000000000000000000000000000000000aa": {
                    "contractVersion": 3,
                    "lastRoundObserved": last_round,
                }
            }),
        })
    }

    #[test]
    fn proxy_snapshots_carry_previous_and_current() {
        let transformer = ContractsTransformer::new("contracts-transformer");
        let first = transformer.transform(None, &raw(100.0, 7)).unwrap();
        let second = transformer
            .transform(Some(&first.state), &raw(400.0, 8))
            .unwrap();

        match &second.alert {
            TransformedMessage::Result(r) => {
                let delta = &r.data["0x00000000000000000000000000000000000000aa"];
                assert_eq!(delta.previous["lastRoundObserved"], json!(7));
                assert_eq!(delta.current["lastRoundObserved"], json!(8));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn first_sight_previous_is_null() {
        let transformer = ContractsTransformer::new("contracts-transformer");
        let out = transformer.transform(None, &raw(100.0, 7)).unwrap();
        match &out.alert {
            TransformedMessage::Result(r) => {
                let delta = &r.data["0x00000000000000000000000000000000000000aa"];
                assert_eq!(delta.previous, serde_json::Value::Null);
            }
            other => panic!("expected result, got {other:?}"),
        }
    }
}
