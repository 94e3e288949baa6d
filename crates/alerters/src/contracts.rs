//! Contracts alerter: missed-observation ladders over the observer
//! output plus chain-level retrieval transition rules.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use lookout_bus::{ConfigDocument, TransformedMessage};
use lookout_core::{Alert, AlertCode, EntityKind, ErrorCode, Metric, MetricIdentity, Severity};

use crate::alerter::Alerter;
use crate::factory::{AlertsConfigFactory, FactoryError, FromFlatConfig, HasParentId};
use crate::thresholds::{Decision, LadderTracker, ThresholdLadder, TransitionFlags};

const METRIC_MISSED_OBSERVATIONS: u32 = 3201;
const METRIC_NO_CONSENSUS: u32 = 3202;
const METRIC_RETRIEVAL: u32 = 3203;

/// One chain's contract alert ruleset.
#[derive(Debug, Clone)]
pub struct ContractsAlertsConfig {
    pub parent_id: String,
    /// Thresholds are consecutive rounds the operator did not answer.
    pub missed_observations: ThresholdLadder,
}

impl FromFlatConfig for ContractsAlertsConfig {
    fn from_flat(
        parent_id: &str,
        by_name: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self, FactoryError> {
        let record = by_name
            .get("price_feed_observations_missed")
            .ok_or_else(|| FactoryError::MissingField("price_feed_observations_missed".into()))?;
        Ok(Self {
            parent_id: parent_id.to_string(),
            missed_observations: ThresholdLadder::from_flat(record)?,
        })
    }
}

impl HasParentId for ContractsAlertsConfig {
    fn parent_id(&self) -> &str {
        &self.parent_id
    }
}

pub struct ContractsAlerter {
    name: String,
    factory: AlertsConfigFactory<ContractsAlertsConfig>,
    tracker: LadderTracker,
    retrieval_errors: TransitionFlags,
    /// Consecutive unanswered rounds per `(parent, operator, proxy)`.
    missed: HashMap<(String, String, String), u64>,
}

impl ContractsAlerter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: AlertsConfigFactory::new(),
            tracker: LadderTracker::new(),
            retrieval_errors: TransitionFlags::new(),
            missed: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn factory_mut(&mut self) -> &mut AlertsConfigFactory<ContractsAlertsConfig> {
        &mut self.factory
    }

    fn retrieval_identity(parent_id: &str, code: ErrorCode) -> MetricIdentity {
        MetricIdentity {
            metric_code: METRIC_RETRIEVAL,
            state_args: vec![parent_id.to_string(), code.code().to_string()],
        }
    }
}

impl Alerter for ContractsAlerter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        EntityKind::ChainlinkContract
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
                    self.tracker.clear();
                    self.missed.clear();
                }
                tracing::info!(chain = chain_name, parent_id = %parent_id, updated, "alerts config installed");
            }
            Err(e) => warn!(chain = chain_name, error = %e, "rejected alerts config"),
        }
    }

    fn handle_reset(&mut self, parent_id: &str) {
        self.tracker.clear_chain(parent_id);
        self.retrieval_errors.clear_chain(parent_id);
        self.missed.retain(|(parent, _, _), _| parent != parent_id);
    }

    fn classify(&mut self, message: &TransformedMessage) -> Vec<Alert> {
        let mut alerts = Vec::new();
        match message {
            TransformedMessage::Result(result) => {
                let meta = &result.meta_data;
                let at = meta.last_monitored.unwrap_or_else(lookout_core::now_ts);

                // A clean per-operator result resolves chain-level
                // retrieval errors.
                for code in [ErrorCode::NoSyncedSource, ErrorCode::CouldNotRetrieveContracts] {
                    let identity = Self::retrieval_identity(&meta.parent_id, code);
                    if self.retrieval_errors.clear(&identity) {
                        alerts.push(Alert {
                            alert_code: AlertCode::new(2201, "contracts_data_source_recovered"),
                            message: format!(
                                "{}: contract data retrievable again",
                                meta.parent_id
                            ),
                            severity: Severity::Info,
                            timestamp: at,
                            parent_id: meta.parent_id.clone(),
                            origin_id: meta.id.clone(),
                            metric: Metric::new(METRIC_RETRIEVAL, "contract_data_retrieval"),
                            metric_state_args: identity.state_args.clone(),
                        });
                    }
                }

                let Some(config) = self.factory.get_by_parent(&meta.parent_id).cloned() else {
                    return alerts;
                };

                for (proxy, delta) in &result.data {
                    let rounds = delta
                        .current
                        .get("historicalRounds")
                        .and_then(|r| r.as_array())
                        .cloned()
                        .unwrap_or_default();

                    // Consecutive-miss counter over the round history.
                    let key = (meta.parent_id.clone(), meta.id.clone(), proxy.clone());
                    let mut missed = *self.missed.get(&key).unwrap_or(&0);
                    let mut saw_no_consensus = false;
                    for round in &rounds {
                        if round.get("roundAnswer").map_or(false, |a| a.is_null()) {
                            saw_no_consensus = true;
                        }
                        if round.get("nodeSubmission").map_or(false, |s| s.is_null()) {
                            missed += 1;
                        } else {
                            missed = 0;
                        }
                    }
                    self.missed.insert(key, missed);

                    let identity = MetricIdentity {
                        metric_code: METRIC_MISSED_OBSERVATIONS,
                        state_args: vec![meta.id.clone(), proxy.clone()],
                    };
                    match self.tracker.evaluate(
                        &meta.parent_id,
                        &identity,
                        &config.missed_observations,
                        missed as f64,
                        at,
                    ) {
                        Some(Decision::IncreasedAbove(severity)) => alerts.push(Alert {
                            alert_code: AlertCode::new(2202, "price_feed_observations_missed"),
                            message: format!(
                                "{}: {missed} consecutive unanswered rounds on {proxy}",
                                meta.name
                            ),
                            severity,
                            timestamp: at,
                            parent_id: meta.parent_id.clone(),
                            origin_id: meta.id.clone(),
                            metric: Metric::new(
                                METRIC_MISSED_OBSERVATIONS,
                                "price_feed_observations_missed",
                            ),
                            metric_state_args: identity.state_args.clone(),
                        }),
                        Some(Decision::DecreasedBelow { .. }) => alerts.push(Alert {
                            alert_code: AlertCode::new(2203, "price_feed_observations_resumed"),
                            message: format!("{}: answering rounds again on {proxy}", meta.name),
                            severity: Severity::Info,
                            timestamp: at,
                            parent_id: meta.parent_id.clone(),
                            origin_id: meta.id.clone(),
                            metric: Metric::new(
                                METRIC_MISSED_OBSERVATIONS,
                                "price_feed_observations_missed",
                            ),
                            metric_state_args: identity.state_args.clone(),
                        }),
                        None => {}
                    }

                    if saw_no_consensus {
                        alerts.push(Alert {
                            alert_code: AlertCode::new(2204, "price_feed_round_without_consensus"),
                            message: format!(
                                "{}: a round on {proxy} has not reached consensus yet",
                                meta.name
                            ),
                            severity: Severity::Warning,
                            timestamp: at,
                            parent_id: meta.parent_id.clone(),
                            origin_id: meta.id.clone(),
                            metric: Metric::new(METRIC_NO_CONSENSUS, "price_feed_consensus"),
                            metric_state_args: vec![meta.id.clone(), proxy.clone()],
                        });
                    }
                }
            }

            TransformedMessage::Error(error) => {
                let meta = &error.meta_data;
                let at = meta.last_monitored.unwrap_or_else(lookout_core::now_ts);
                match error.error.code {
                    code @ (ErrorCode::NoSyncedSource | ErrorCode::CouldNotRetrieveContracts) => {
                        let identity = Self::retrieval_identity(&meta.parent_id, code);
                        if self.retrieval_errors.set(&meta.parent_id, identity.clone()) {
                            alerts.push(Alert {
                                alert_code: AlertCode::new(2200, "contracts_data_not_retrievable"),
                                message: format!("{}: {}", meta.parent_id, error.error.message),
                                severity: Severity::Error,
                                timestamp: at,
                                parent_id: meta.parent_id.clone(),
                                origin_id: meta.id.clone(),
                                metric: Metric::new(METRIC_RETRIEVAL, "contract_data_retrieval"),
                                metric_state_args: identity.state_args.clone(),
                            });
                        }
                    }
                    _ => {}
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

    fn meta(at: f64) -> TransformedMeta {
        TransformedMeta {
            monitor_name: "contracts-monitor (chain_A)".into(),
            kind: EntityKind::ChainlinkContract,
            id: "node_1".into(),
            name: "ocr-node".into(),
            parent_id: "chain_A".into(),
            last_monitored: Some(at),
        }
    }

    fn configured_alerter() -> ContractsAlerter {
        let mut alerter = ContractsAlerter::new("contracts-alerter");
        let mut record = BTreeMap::new();
        record.insert("parent_id".to_string(), "chain_A".to_string());
        record.insert(
            "name".to_string(),
            "price_feed_observations_missed".to_string(),
        );
        record.insert("enabled".to_string(), "true".to_string());
        record.insert("warning_threshold".to_string(), "2".to_string());
        record.insert("critical_threshold".to_string(), "5".to_string());
        let mut flat = crate::factory::FlatConfig::new();
        flat.insert("1".to_string(), record);
        alerter.factory_mut().add("bsc", &flat).unwrap();
        alerter
    }

    fn result_with_rounds(at: f64, rounds: serde_json::Value) -> TransformedMessage {
        let mut data = BTreeMap::new();
        data.insert(
            "0xproxy".to_string(),
            ValueDelta::new(
                json!(null),
                json!({"contractVersion": 4, "historicalRounds": rounds}),
            ),
        );
        TransformedMessage::Result(TransformedResult {
            meta_data: meta(at),
            data,
        })
    }

    #[test]
    fn consecutive_misses_cross_the_ladder() {
        let mut alerter = configured_alerter();

        // One miss: below the warning threshold of 2.
        let alerts = alerter.classify(&result_with_rounds(
            100.0,
            json!([{"roundId": 1, "roundAnswer": "5", "nodeSubmission": null}]),
        ));
        assert!(alerts.is_empty());

        // Second consecutive miss: warning.
        let alerts = alerter.classify(&result_with_rounds(
            400.0,
            json!([{"roundId": 2, "roundAnswer": "6", "nodeSubmission": null}]),
        ));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(
            alerts[0].metric_state_args,
            vec!["node_1".to_string(), "0xproxy".to_string()]
        );

        // An answered round resets the counter and resolves.
        let alerts = alerter.classify(&result_with_rounds(
            700.0,
            json!([{"roundId": 3, "roundAnswer": "7", "nodeSubmission": "7"}]),
        ));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_code.name, "price_feed_observations_resumed");
    }

    #[test]
    fn round_without_consensus_warns() {
        let mut alerter = configured_alerter();
        let alerts = alerter.classify(&result_with_rounds(
            100.0,
            json!([{"roundId": 8, "roundAnswer": null, "nodeSubmission": "42"}]),
        ));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_code.name, "price_feed_round_without_consensus");
    }

    #[test]
    fn retrieval_error_fires_once_and_resolves_on_clean_result() {
        let mut alerter = configured_alerter();
        let error = TransformedMessage::Error(TransformedError {
            meta_data: meta(100.0),
            error: MonitoringError::new(
                ErrorCode::NoSyncedSource,
                "no synced EVM node accessible",
            ),
            data: BTreeMap::new(),
        });

        assert_eq!(alerter.classify(&error).len(), 1);
        assert!(alerter.classify(&error).is_empty());

        let alerts = alerter.classify(&result_with_rounds(400.0, json!([])));
        assert!(alerts
            .iter()
            .any(|a| a.alert_code.name == "contracts_data_source_recovered"));
    }

    #[test]
    fn component_reset_restarts_the_miss_counters() {
        let mut alerter = configured_alerter();

        // Two consecutive misses: the warning rung fires.
        alerter.classify(&result_with_rounds(
            100.0,
            json!([{"roundId": 1, "roundAnswer": "5", "nodeSubmission": null}]),
        ));
        let fired = alerter.classify(&result_with_rounds(
            400.0,
            json!([{"roundId": 2, "roundAnswer": "6", "nodeSubmission": null}]),
        ));
        assert_eq!(fired.len(), 1);

        alerter.handle_reset("chain_A");

        // The counter restarted from zero: a single further miss sits
        // below the threshold again, and no stale resolution is emitted.
        let alerts = alerter.classify(&result_with_rounds(
            700.0,
            json!([{"roundId": 3, "roundAnswer": "7", "nodeSubmission": null}]),
        ));
        assert!(alerts.is_empty());
    }
}
