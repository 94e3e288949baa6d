//! System alerter: threshold ladders over host metrics plus the downtime
//! transition rule.

use std::collections::BTreeMap;

use tracing::warn;

use lookout_bus::{ConfigDocument, TransformedMessage};
use lookout_core::{Alert, AlertCode, EntityKind, ErrorCode, Metric, MetricIdentity, Severity};

use crate::alerter::Alerter;
use crate::factory::{AlertsConfigFactory, FactoryError, FromFlatConfig, HasParentId};
use crate::thresholds::{Decision, LadderTracker, ThresholdLadder, TransitionFlags};

// Metric and alert codes are a wire contract; do not renumber.
const METRIC_CPU: u32 = 3001;
const METRIC_RAM: u32 = 3002;
const METRIC_STORAGE: u32 = 3003;
const METRIC_OPEN_FDS: u32 = 3004;
const METRIC_IS_DOWN: u32 = 3005;
const METRIC_SOURCE_ACCESS: u32 = 3006;

/// (metric code, metric name, transformed field) for the ladder metrics.
const LADDER_METRICS: &[(u32, &str, &str)] = &[
    (METRIC_CPU, "system_cpu_usage", "system_cpu_usage"),
    (METRIC_RAM, "system_ram_usage", "system_ram_usage"),
    (METRIC_STORAGE, "system_storage_usage", "system_storage_usage"),
    (METRIC_OPEN_FDS, "open_file_descriptors", "open_file_descriptors"),
];

/// One chain's system alert ruleset.
#[derive(Debug, Clone)]
pub struct SystemAlertsConfig {
    pub parent_id: String,
    pub cpu: ThresholdLadder,
    pub ram: ThresholdLadder,
    pub storage: ThresholdLadder,
    pub open_fds: ThresholdLadder,
    /// Thresholds are seconds of downtime.
    pub is_down: ThresholdLadder,
}

impl SystemAlertsConfig {
    fn ladder_for(&self, metric_code: u32) -> &ThresholdLadder {
        match metric_code {
            METRIC_CPU => &self.cpu,
            METRIC_RAM => &self.ram,
            METRIC_STORAGE => &self.storage,
            METRIC_OPEN_FDS => &self.open_fds,
            _ => &self.is_down,
        }
    }
}

impl FromFlatConfig for SystemAlertsConfig {
    fn from_flat(
        parent_id: &str,
        by_name: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self, FactoryError> {
        let ladder = |name: &str| -> Result<ThresholdLadder, FactoryError> {
            let record = by_name
                .get(name)
                .ok_or_else(|| FactoryError::MissingField(name.to_string()))?;
            ThresholdLadder::from_flat(record)
        };
        Ok(Self {
            parent_id: parent_id.to_string(),
            cpu: ladder("system_cpu_usage")?,
            ram: ladder("system_ram_usage")?,
            storage: ladder("system_storage_usage")?,
            open_fds: ladder("open_file_descriptors")?,
            is_down: ladder("system_is_down")?,
        })
    }
}

impl HasParentId for SystemAlertsConfig {
    fn parent_id(&self) -> &str {
        &self.parent_id
    }
}

pub struct SystemAlerter {
    name: String,
    factory: AlertsConfigFactory<SystemAlertsConfig>,
    tracker: LadderTracker,
    source_errors: TransitionFlags,
}

impl SystemAlerter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: AlertsConfigFactory::new(),
            tracker: LadderTracker::new(),
            source_errors: TransitionFlags::new(),
        }
    }

    #[cfg(test)]
    pub fn factory_mut(&mut self) -> &mut AlertsConfigFactory<SystemAlertsConfig> {
        &mut self.factory
    }

    fn alert(
        meta: &lookout_bus::TransformedMeta,
        code: u32,
        code_name: &str,
        message: String,
        severity: Severity,
        at: f64,
        metric_code: u32,
        metric_name: &str,
    ) -> Alert {
        Alert {
            alert_code: AlertCode::new(code, code_name),
            message,
            severity,
            timestamp: at,
            parent_id: meta.parent_id.clone(),
            origin_id: meta.id.clone(),
            metric: Metric::new(metric_code, metric_name),
            metric_state_args: vec![meta.id.clone()],
        }
    }

    fn identity(metric_code: u32, origin_id: &str) -> MetricIdentity {
        MetricIdentity {
            metric_code,
            state_args: vec![origin_id.to_string()],
        }
    }
}

impl Alerter for SystemAlerter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        EntityKind::System
    }

    fn config_pattern(&self) -> Option<String> {
        Some("chains.#.alerts_config".to_string())
    }

    fn handle_config(&mut self, chain_name: &str, doc: &ConfigDocument) {
        if doc.sections.is_empty() {
            self.factory.remove(chain_name);
            return;
        }
        match self.factory.add(chain_name, &doc.sections) {
            Ok((updated, parent_id)) => {
                if updated {
                    // New thresholds invalidate old crossing state.
                    self.tracker.clear();
                }
                tracing::info!(chain = chain_name, parent_id = %parent_id, updated, "alerts config installed");
            }
            Err(e) => warn!(chain = chain_name, error = %e, "rejected alerts config"),
        }
    }

    fn handle_reset(&mut self, parent_id: &str) {
        self.tracker.clear_chain(parent_id);
        self.source_errors.clear_chain(parent_id);
    }

    fn classify(&mut self, message: &TransformedMessage) -> Vec<Alert> {
        let mut alerts = Vec::new();
        match message {
            TransformedMessage::Result(result) => {
                let meta = &result.meta_data;
                let Some(config) = self.factory.get_by_parent(&meta.parent_id).cloned() else {
                    return alerts;
                };
                let at = meta.last_monitored.unwrap_or_else(lookout_core::now_ts);

                // A successful observation resolves source-level errors.
                let access_identity = Self::identity(METRIC_SOURCE_ACCESS, &meta.id);
                if self.source_errors.clear(&access_identity) {
                    alerts.push(Self::alert(
                        meta,
                        2013,
                        "system_source_accessible_again",
                        format!("{}: metrics source accessible again", meta.name),
                        Severity::Info,
                        at,
                        METRIC_SOURCE_ACCESS,
                        "source_access",
                    ));
                }

                // ...and ends any tracked downtime.
                let down_identity = Self::identity(METRIC_IS_DOWN, &meta.id);
                if let Some(Decision::DecreasedBelow { .. }) = self.tracker.evaluate(
                    &meta.parent_id,
                    &down_identity,
                    &config.is_down,
                    0.0,
                    at,
                ) {
                    alerts.push(Self::alert(
                        meta,
                        2011,
                        "system_back_up_again",
                        format!("{}: system is back up", meta.name),
                        Severity::Info,
                        at,
                        METRIC_IS_DOWN,
                        "system_is_down",
                    ));
                }

                for &(metric_code, metric_name, field) in LADDER_METRICS {
                    let Some(value) = result
                        .data
                        .get(field)
                        .and_then(|delta| delta.current.as_f64())
                    else {
                        continue;
                    };
                    let identity = Self::identity(metric_code, &meta.id);
                    let ladder = config.ladder_for(metric_code);
                    match self
                        .tracker
                        .evaluate(&meta.parent_id, &identity, ladder, value, at)
                    {
                        Some(Decision::IncreasedAbove(severity)) => {
                            alerts.push(Self::alert(
                                meta,
                                2001,
                                &format!("{metric_name}_increased_above_threshold"),
                                format!(
                                    "{}: {} increased above {} threshold ({value:.1})",
                                    meta.name, metric_name, severity
                                ),
                                severity,
                                at,
                                metric_code,
                                metric_name,
                            ));
                        }
                        Some(Decision::DecreasedBelow { resolved }) => {
                            alerts.push(Self::alert(
                                meta,
                                2002,
                                &format!("{metric_name}_decreased_below_threshold"),
                                format!(
                                    "{}: {} decreased below {} threshold ({value:.1})",
                                    meta.name, metric_name, resolved
                                ),
                                Severity::Info,
                                at,
                                metric_code,
                                metric_name,
                            ));
                        }
                        None => {}
                    }
                }
            }

            TransformedMessage::Error(error) => {
                let meta = &error.meta_data;
                let at = meta.last_monitored.unwrap_or_else(lookout_core::now_ts);
                match error.error.code {
                    ErrorCode::NodeIsDown => {
                        let Some(config) = self.factory.get_by_parent(&meta.parent_id).cloned()
                        else {
                            return alerts;
                        };
                        let went_down_at = error
                            .data
                            .get("went_down_at")
                            .and_then(|delta| delta.current.as_f64())
                            .unwrap_or(at);
                        let downtime = (at - went_down_at).max(0.0);
                        let identity = Self::identity(METRIC_IS_DOWN, &meta.id);
                        if let Some(Decision::IncreasedAbove(severity)) = self.tracker.evaluate(
                            &meta.parent_id,
                            &identity,
                            &config.is_down,
                            downtime,
                            at,
                        ) {
                            alerts.push(Self::alert(
                                meta,
                                2010,
                                "system_went_down",
                                format!("{}: system is down ({downtime:.0}s)", meta.name),
                                severity,
                                at,
                                METRIC_IS_DOWN,
                                "system_is_down",
                            ));
                        }
                    }
                    ErrorCode::CannotAccessSource | ErrorCode::DataReading
                    | ErrorCode::MetricNotFound => {
                        let identity = Self::identity(METRIC_SOURCE_ACCESS, &meta.id);
                        if self.source_errors.set(&meta.parent_id, identity) {
                            alerts.push(Self::alert(
                                meta,
                                2012,
                                "system_source_not_accessible",
                                format!("{}: {}", meta.name, error.error.message),
                                Severity::Error,
                                at,
                                METRIC_SOURCE_ACCESS,
                                "source_access",
                            ));
                        }
                    }
                    _ => {
                        // Schema-level errors are logged upstream, not alerted.
                    }
                }
            }
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_bus::{TransformedError, TransformedMeta, TransformedResult, ValueDelta};
    use lookout_core::MonitoringError;
    use serde_json::json;

    fn meta() -> TransformedMeta {
        TransformedMeta {
            monitor_name: "system-monitor (host-a)".into(),
            kind: EntityKind::System,
            id: "sys_1".into(),
            name: "host-a".into(),
            parent_id: "chain_A".into(),
            last_monitored: Some(1000.0),
        }
    }

    fn flat_ladder(name: &str, warning: &str, critical: &str) -> BTreeMap<String, String> {
        let mut record = BTreeMap::new();
        record.insert("parent_id".to_string(), "chain_A".to_string());
        record.insert("name".to_string(), name.to_string());
        record.insert("enabled".to_string(), "true".to_string());
        record.insert("warning_threshold".to_string(), warning.to_string());
        record.insert("critical_threshold".to_string(), critical.to_string());
        record
    }

    fn configured_alerter() -> SystemAlerter {
        let mut alerter = SystemAlerter::new("system-alerter");
        let mut flat = crate::factory::FlatConfig::new();
        for (i, (name, warning, critical)) in [
            ("system_cpu_usage", "85", "95"),
            ("system_ram_usage", "85", "95"),
            ("system_storage_usage", "85", "95"),
            ("open_file_descriptors", "85", "95"),
            ("system_is_down", "60", "300"),
        ]
        .iter()
        .enumerate()
        {
            flat.insert((i + 1).to_string(), flat_ladder(name, warning, critical));
        }
        alerter.factory_mut().add("bsc", &flat).unwrap();
        alerter
    }

    fn result_with_cpu(cpu: f64, at: f64) -> TransformedMessage {
        let mut data = BTreeMap::new();
        data.insert(
            "system_cpu_usage".to_string(),
            ValueDelta::new(json!(null), json!(cpu)),
        );
        let mut m = meta();
        m.last_monitored = Some(at);
        TransformedMessage::Result(TransformedResult {
            meta_data: m,
            data,
        })
    }

    fn downtime_error(at: f64, went_down_at: f64) -> TransformedMessage {
        let mut data = BTreeMap::new();
        data.insert(
            "went_down_at".to_string(),
            ValueDelta::new(json!(null), json!(went_down_at)),
        );
        let mut m = meta();
        m.last_monitored = Some(at);
        TransformedMessage::Error(TransformedError {
            meta_data: m,
            error: MonitoringError::node_is_down("host-a"),
            data,
        })
    }

    #[test]
    fn cpu_crossing_emits_once_then_resolves() {
        let mut alerter = configured_alerter();

        let fired = alerter.classify(&result_with_cpu(91.0, 1000.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, Severity::Warning);
        assert_eq!(fired[0].metric.metric_code, METRIC_CPU);
        assert_eq!(fired[0].metric_state_args, vec!["sys_1".to_string()]);

        // Still above: deduplicated.
        assert!(alerter.classify(&result_with_cpu(92.0, 1060.0)).is_empty());

        // Back below warning: one INFO resolution.
        let resolved = alerter.classify(&result_with_cpu(40.0, 1120.0));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].severity, Severity::Info);
    }

    #[test]
    fn unconfigured_chain_is_ignored() {
        let mut alerter = SystemAlerter::new("system-alerter");
        assert!(alerter.classify(&result_with_cpu(99.0, 1000.0)).is_empty());
    }

    #[test]
    fn downtime_ladder_fires_and_recovery_resolves() {
        let mut alerter = configured_alerter();

        // 30s down: below the 60s warning window value.
        assert!(alerter.classify(&downtime_error(1030.0, 1000.0)).is_empty());

        // 90s down: warning.
        let fired = alerter.classify(&downtime_error(1090.0, 1000.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alert_code.name, "system_went_down");
        assert_eq!(fired[0].severity, Severity::Warning);

        // Recovery produces the back-up INFO alert.
        let recovered = alerter.classify(&result_with_cpu(10.0, 1150.0));
        assert!(recovered
            .iter()
            .any(|a| a.alert_code.name == "system_back_up_again" && a.severity == Severity::Info));
    }

    #[test]
    fn source_error_fires_once_and_resolves_once() {
        let mut alerter = configured_alerter();
        let mut m = meta();
        m.last_monitored = Some(1000.0);
        let error = TransformedMessage::Error(TransformedError {
            meta_data: m,
            error: MonitoringError::cannot_access("http://host-a:9100/metrics"),
            data: BTreeMap::new(),
        });

        let first = alerter.classify(&error);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].severity, Severity::Error);
        // Repeated errors stay silent.
        assert!(alerter.classify(&error).is_empty());

        let resolved = alerter.classify(&result_with_cpu(10.0, 1060.0));
        assert!(resolved
            .iter()
            .any(|a| a.alert_code.name == "system_source_accessible_again"));
    }

    #[test]
    fn component_reset_purges_dedup_state() {
        let mut alerter = configured_alerter();

        // A crossing and an active source error, both for chain_A.
        assert_eq!(alerter.classify(&result_with_cpu(91.0, 1000.0)).len(), 1);
        let mut m = meta();
        m.last_monitored = Some(1030.0);
        let error = TransformedMessage::Error(TransformedError {
            meta_data: m,
            error: MonitoringError::cannot_access("http://host-a:9100/metrics"),
            data: BTreeMap::new(),
        });
        assert_eq!(alerter.classify(&error).len(), 1);

        alerter.handle_reset("chain_A");

        // The still-high value alerts afresh instead of deduplicating, and
        // the repeated source error fires again.
        let refired = alerter.classify(&result_with_cpu(92.0, 1060.0));
        assert_eq!(refired.len(), 1);
        assert_eq!(refired[0].severity, Severity::Warning);
        assert_eq!(alerter.classify(&error).len(), 1);
    }
}
