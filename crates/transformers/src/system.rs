//! System transformer: flat host metrics to stateful snapshots with
//! synthesized rates and the downtime marker.

use std::collections::BTreeMap;

use lookout_bus::{
    RawMessage, SavePayload, TransformedError, TransformedMessage, TransformedResult, ValueDelta,
};
use lookout_core::{EntityKind, ErrorCode, SystemState};

use crate::transformer::{
    field_deltas, interval_delta, rate, state_fields, transformed_meta, TransformError,
    Transformed, Transformer,
};

pub struct SystemTransformer {
    name: String,
}

impl SystemTransformer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

fn metric(data: &serde_json::Value, field: &str) -> Option<f64> {
    data.get(field).and_then(serde_json::Value::as_f64)
}

impl Transformer for SystemTransformer {
    type State = SystemState;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        EntityKind::System
    }

    fn transform(
        &self,
        prior: Option<&SystemState>,
        raw: &RawMessage,
    ) -> Result<Transformed<SystemState>, TransformError> {
        match raw {
            RawMessage::Result(result) => {
                if !result.data.is_object() {
                    return Err(TransformError::Schema("result data is not an object".into()));
                }
                let t_now = result.meta_data.time;
                let t_prev = prior.and_then(|s| s.last_monitored);

                let mut state = SystemState {
                    process_cpu_seconds_total: metric(&result.data, "process_cpu_seconds_total"),
                    process_memory_usage: metric(&result.data, "process_memory_usage"),
                    virtual_memory_usage: metric(&result.data, "virtual_memory_usage"),
                    open_file_descriptors: metric(&result.data, "open_file_descriptors"),
                    system_cpu_usage: metric(&result.data, "system_cpu_usage"),
                    system_ram_usage: metric(&result.data, "system_ram_usage"),
                    system_storage_usage: metric(&result.data, "system_storage_usage"),
                    network_transmit_bytes_total: metric(&result.data, "network_transmit_bytes_total"),
                    network_receive_bytes_total: metric(&result.data, "network_receive_bytes_total"),
                    disk_io_time_seconds_total: metric(&result.data, "disk_io_time_seconds_total"),
                    network_transmit_bytes_per_second: None,
                    network_receive_bytes_per_second: None,
                    disk_io_time_seconds_in_interval: None,
                    went_down_at: None,
                    last_monitored: Some(t_now),
                };

                state.network_transmit_bytes_per_second = rate(
                    prior.and_then(|s| s.network_transmit_bytes_total),
                    state.network_transmit_bytes_total,
                    t_prev,
                    t_now,
                );
                state.network_receive_bytes_per_second = rate(
                    prior.and_then(|s| s.network_receive_bytes_total),
                    state.network_receive_bytes_total,
                    t_prev,
                    t_now,
                );
                state.disk_io_time_seconds_in_interval = interval_delta(
                    prior.and_then(|s| s.disk_io_time_seconds_total),
                    state.disk_io_time_seconds_total,
                );
                // A successful observation ends any downtime.
                state.mark_up();

                let current_fields = state_fields(&state)?;
                let previous_fields = prior.map(state_fields).transpose()?;
                let deltas = field_deltas(
                    previous_fields.as_ref(),
                    &current_fields,
                    &["last_monitored"],
                );

                let meta = transformed_meta(&result.meta_data, Some(t_now));
                Ok(Transformed {
                    save: SavePayload {
                        meta_data: meta.clone(),
                        fields: current_fields,
                    },
                    alert: TransformedMessage::Result(TransformedResult {
                        meta_data: meta,
                        data: deltas,
                    }),
                    state,
                })
            }

            RawMessage::Error(error) if error.error.code == ErrorCode::NodeIsDown => {
                let mut state = prior.cloned().unwrap_or_default();
                let previous_down = state.went_down_at;
                let went_down_at = state.mark_down(error.meta_data.time);
                state.last_monitored = Some(error.meta_data.time);

                let mut fields = BTreeMap::new();
                fields.insert("went_down_at".to_string(), serde_json::json!(went_down_at));
                fields.insert(
                    "last_monitored".to_string(),
                    serde_json::json!(state.last_monitored),
                );

                let mut deltas = BTreeMap::new();
                deltas.insert(
                    "went_down_at".to_string(),
                    ValueDelta::new(
                        serde_json::json!(previous_down),
                        serde_json::json!(went_down_at),
                    ),
                );

                let meta = transformed_meta(&error.meta_data, state.last_monitored);
                Ok(Transformed {
                    save: SavePayload {
                        meta_data: meta.clone(),
                        fields,
                    },
                    alert: TransformedMessage::Error(TransformedError {
                        meta_data: meta,
                        error: error.error.clone(),
                        data: deltas,
                    }),
                    state,
                })
            }

            // Any other error passes through untouched; state stays as-is.
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
    use lookout_bus::{MetaData, RawError, RawResult};
    use lookout_core::MonitoringError;
    use serde_json::json;

    fn meta(time: f64) -> MetaData {
        MetaData {
            monitor_name: "system-monitor (host-a)".into(),
            kind: EntityKind::System,
            id: "sys_1".into(),
            name: "host-a".into(),
            parent_id: "chain_1".into(),
            time,
        }
    }

    fn success(time: f64, cpu: f64, tx: f64) -> RawMessage {
        RawMessage::Result(RawResult {
            meta_data: meta(time),
            data: json!({
                "process_cpu_seconds_total": cpu,
                "network_transmit_bytes_total": tx,
            }),
        })
    }

    fn downtime(time: f64) -> RawMessage {
        RawMessage::Error(RawError {
            meta_data: meta(time),
            error: MonitoringError::node_is_down("host-a"),
        })
    }

    fn alert_data(out: &Transformed<SystemState>) -> &BTreeMap<String, ValueDelta> {
        match &out.alert {
            TransformedMessage::Result(r) => &r.data,
            TransformedMessage::Error(e) => &e.data,
        }
    }

    #[test]
    fn first_sight_has_null_rates_and_null_previous() {
        let transformer = SystemTransformer::new("system-transformer");
        let out = transformer
            .transform(None, &success(1000.0, 100.0, 1000.0))
            .unwrap();

        assert_eq!(out.state.network_transmit_bytes_per_second, None);
        assert_eq!(out.state.last_monitored, Some(1000.0));

        // Store slice carries the flats.
        assert_eq!(out.save.fields["process_cpu_seconds_total"], json!(100.0));
        assert_eq!(out.save.fields["network_transmit_bytes_total"], json!(1000.0));
        assert_eq!(out.save.fields["network_transmit_bytes_per_second"], json!(null));

        // Every alert-payload previous is null on first sight.
        let data = alert_data(&out);
        assert!(data
            .values()
            .all(|delta| delta.previous == serde_json::Value::Null));
        assert_eq!(data["network_transmit_bytes_per_second"].current, json!(null));
        assert!(!data.contains_key("last_monitored"));
    }

    #[test]
    fn second_sight_synthesizes_rates() {
        let transformer = SystemTransformer::new("system-transformer");
        let first = transformer
            .transform(None, &success(1000.0, 100.0, 1000.0))
            .unwrap();
        let second = transformer
            .transform(Some(&first.state), &success(1060.0, 130.0, 1600.0))
            .unwrap();

        // (1600 - 1000) / (1060 - 1000)
        assert_eq!(second.state.network_transmit_bytes_per_second, Some(10.0));
        assert_eq!(second.save.fields["network_transmit_bytes_total"], json!(1600.0));

        let data = alert_data(&second);
        assert_eq!(data["network_transmit_bytes_total"].previous, json!(1000.0));
        assert_eq!(data["network_transmit_bytes_total"].current, json!(1600.0));
    }

    #[test]
    fn downtime_sets_and_preserves_went_down_at_then_recovery_clears_it() {
        let transformer = SystemTransformer::new("system-transformer");
        let first = transformer
            .transform(None, &success(1000.0, 100.0, 1000.0))
            .unwrap();
        let second = transformer
            .transform(Some(&first.state), &success(1060.0, 130.0, 1600.0))
            .unwrap();

        // Downtime error at t=1120.
        let down = transformer
            .transform(Some(&second.state), &downtime(1120.0))
            .unwrap();
        assert_eq!(down.state.went_down_at, Some(1120.0));
        assert_eq!(down.save.fields["went_down_at"], json!(1120.0));
        let down_data = alert_data(&down);
        assert_eq!(down_data["went_down_at"].previous, json!(null));
        assert_eq!(down_data["went_down_at"].current, json!(1120.0));

        // A second downtime error preserves the original start.
        let still_down = transformer
            .transform(Some(&down.state), &downtime(1150.0))
            .unwrap();
        assert_eq!(still_down.state.went_down_at, Some(1120.0));

        // Recovery at t=1180: marker cleared, rate over the last 60s.
        let recovered = transformer
            .transform(Some(&down.state), &success(1180.0, 150.0, 2200.0))
            .unwrap();
        assert_eq!(recovered.state.went_down_at, None);
        let rec_data = alert_data(&recovered);
        assert_eq!(rec_data["went_down_at"].previous, json!(1120.0));
        assert_eq!(rec_data["went_down_at"].current, json!(null));
        // (2200 - 1600) / (1180 - 1120)
        assert_eq!(recovered.state.network_transmit_bytes_per_second, Some(10.0));
    }

    #[test]
    fn non_downtime_errors_pass_through_untouched() {
        let transformer = SystemTransformer::new("system-transformer");
        let first = transformer
            .transform(None, &success(1000.0, 100.0, 1000.0))
            .unwrap();

        let raw = RawMessage::Error(RawError {
            meta_data: meta(1060.0),
            error: MonitoringError::cannot_access("http://host-a:9100/metrics"),
        });
        let out = transformer.transform(Some(&first.state), &raw).unwrap();

        assert_eq!(out.state, first.state);
        assert!(out.save.fields.is_empty());
        match &out.alert {
            TransformedMessage::Error(e) => {
                assert_eq!(e.error.code, ErrorCode::CannotAccessSource);
                assert!(e.data.is_empty());
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
    }
}
