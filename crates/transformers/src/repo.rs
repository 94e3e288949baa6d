//! Repository transformer: release-feed readings to release-count deltas.

use std::collections::BTreeMap;

use lookout_bus::{
    RawMessage, SavePayload, TransformedError, TransformedMessage, TransformedResult, ValueDelta,
};
use lookout_core::{EntityKind, RepoState};

use crate::transformer::{transformed_meta, TransformError, Transformed, Transformer};

pub struct RepoTransformer {
    name: String,
}

impl RepoTransformer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Transformer for RepoTransformer {
    type State = RepoState;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Repository
    }

    fn transform(
        &self,
        prior: Option<&RepoState>,
        raw: &RawMessage,
    ) -> Result<Transformed<RepoState>, TransformError> {
        match raw {
            RawMessage::Result(result) => {
                let no_of_releases = result
                    .data
                    .get("no_of_releases")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| {
                        TransformError::Schema("repository result lacks no_of_releases".into())
                    })?;
                let releases = result
                    .data
                    .get("releases")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));

                let previous_count = prior.and_then(|s| s.no_of_releases);
                let state = RepoState {
                    no_of_releases: Some(no_of_releases),
                    last_monitored: Some(result.meta_data.time),
                };

                let mut fields = BTreeMap::new();
                fields.insert("no_of_releases".to_string(), serde_json::json!(no_of_releases));
                fields.insert(
                    "last_monitored".to_string(),
                    serde_json::json!(state.last_monitored),
                );

                let mut deltas = BTreeMap::new();
                deltas.insert(
                    "no_of_releases".to_string(),
                    ValueDelta::new(
                        serde_json::json!(previous_count),
                        serde_json::json!(no_of_releases),
                    ),
                );
                // The release details ride along so the alerter can name
                // what was published; only the count is stateful.
                deltas.insert(
                    "releases".to_string(),
                    ValueDelta::new(serde_json::Value::Null, releases),
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

    fn raw(time: f64, count: u64) -> RawMessage {
        RawMessage::Result(RawResult {
            meta_data: MetaData {
                monitor_name: "repo-monitor (client)".into(),
                kind: EntityKind::Repository,
                id: "repo_1".into(),
                name: "client".into(),
                parent_id: "chain_1".into(),
                time,
            },
            data: json!({
                "no_of_releases": count,
                "releases": {"0": {"release_name": "v2.0", "tag_name": "v2.0.0"}},
            }),
        })
    }

    #[test]
    fn release_count_delta_tracks_prior_state() {
        let transformer = RepoTransformer::new("repo-transformer");
        let first = transformer.transform(None, &raw(100.0, 4)).unwrap();
        assert_eq!(first.state.no_of_releases, Some(4));

        let second = transformer
            .transform(Some(&first.state), &raw(160.0, 5))
            .unwrap();
        match &second.alert {
            TransformedMessage::Result(r) => {
                assert_eq!(r.data["no_of_releases"].previous, json!(4));
                assert_eq!(r.data["no_of_releases"].current, json!(5));
                assert_eq!(r.data["releases"].current["0"]["tag_name"], json!("v2.0.0"));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn missing_count_is_a_schema_error() {
        let transformer = RepoTransformer::new("repo-transformer");
        let raw = RawMessage::Result(RawResult {
            meta_data: MetaData {
                monitor_name: "m".into(),
                kind: EntityKind::Repository,
                id: "repo_1".into(),
                name: "client".into(),
                parent_id: "chain_1".into(),
                time: 1.0,
            },
            data: json!({"releases": {}}),
        });
        assert!(transformer.transform(None, &raw).is_err());
    }
}
