//! Repository alerter: new-release announcements plus the accessibility
//! transition rule.

use lookout_bus::TransformedMessage;
use lookout_core::{Alert, AlertCode, EntityKind, ErrorCode, Metric, MetricIdentity, Severity};

use crate::alerter::Alerter;
use crate::thresholds::TransitionFlags;

const METRIC_NEW_RELEASE: u32 = 3101;
const METRIC_PAGE_ACCESS: u32 = 3102;

pub struct RepoAlerter {
    name: String,
    page_errors: TransitionFlags,
}

impl RepoAlerter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_errors: TransitionFlags::new(),
        }
    }

    fn access_identity(repo_id: &str) -> MetricIdentity {
        MetricIdentity {
            metric_code: METRIC_PAGE_ACCESS,
            state_args: vec![repo_id.to_string()],
        }
    }
}

impl Alerter for RepoAlerter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Repository
    }

    fn handle_reset(&mut self, parent_id: &str) {
        self.page_errors.clear_chain(parent_id);
    }

    fn classify(&mut self, message: &TransformedMessage) -> Vec<Alert> {
        let mut alerts = Vec::new();
        match message {
            TransformedMessage::Result(result) => {
                let meta = &result.meta_data;
                let at = meta.last_monitored.unwrap_or_else(lookout_core::now_ts);

                if self.page_errors.clear(&Self::access_identity(&meta.id)) {
                    alerts.push(Alert {
                        alert_code: AlertCode::new(2101, "repo_page_accessible_again"),
                        message: format!("{}: release page accessible again", meta.name),
                        severity: Severity::Info,
                        timestamp: at,
                        parent_id: meta.parent_id.clone(),
                        origin_id: meta.id.clone(),
                        metric: Metric::new(METRIC_PAGE_ACCESS, "page_access"),
                        metric_state_args: vec![meta.id.clone()],
                    });
                }

                let previous = result
                    .data
                    .get("no_of_releases")
                    .and_then(|d| d.previous.as_u64());
                let current = result
                    .data
                    .get("no_of_releases")
                    .and_then(|d| d.current.as_u64());
                if let (Some(previous), Some(current)) = (previous, current) {
                    if current > previous {
                        let releases = result
                            .data
                            .get("releases")
                            .map(|d| d.current.clone())
                            .unwrap_or(serde_json::Value::Null);
                        let new_releases = current - previous;
                        // Index 0 is the newest release: announce the old
                        // ones first.
                        for i in 0..new_releases {
                            let index = (new_releases - i - 1).to_string();
                            let tag = releases[index.as_str()]["tag_name"]
                                .as_str()
                                .unwrap_or("unknown")
                                .to_string();
                            let release_name = releases[index.as_str()]["release_name"]
                                .as_str()
                                .unwrap_or(&tag)
                                .to_string();
                            alerts.push(Alert {
                                alert_code: AlertCode::new(2100, "repo_new_release"),
                                message: format!(
                                    "{}: new release {release_name} ({tag})",
                                    meta.name
                                ),
                                severity: Severity::Info,
                                timestamp: at,
                                parent_id: meta.parent_id.clone(),
                                origin_id: meta.id.clone(),
                                metric: Metric::new(METRIC_NEW_RELEASE, "no_of_releases"),
                                metric_state_args: vec![meta.id.clone(), tag],
                            });
                        }
                    }
                }
            }

            TransformedMessage::Error(error) => {
                let meta = &error.meta_data;
                let at = meta.last_monitored.unwrap_or_else(lookout_core::now_ts);
                match error.error.code {
                    ErrorCode::CannotAccessSource
                    | ErrorCode::JsonDecode
                    | ErrorCode::DataReading => {
                        if self
                            .page_errors
                            .set(&meta.parent_id, Self::access_identity(&meta.id))
                        {
                            alerts.push(Alert {
                                alert_code: AlertCode::new(2102, "repo_page_not_accessible"),
                                message: format!("{}: {}", meta.name, error.error.message),
                                severity: Severity::Error,
                                timestamp: at,
                                parent_id: meta.parent_id.clone(),
                                origin_id: meta.id.clone(),
                                metric: Metric::new(METRIC_PAGE_ACCESS, "page_access"),
                                metric_state_args: vec![meta.id.clone()],
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
    use std::collections::BTreeMap;

    fn meta(at: f64) -> TransformedMeta {
        TransformedMeta {
            monitor_name: "repo-monitor (client)".into(),
            kind: EntityKind::Repository,
            id: "repo_1".into(),
            name: "client".into(),
            parent_id: "chain_A".into(),
            last_monitored: Some(at),
        }
    }

    fn result(at: f64, previous: Option<u64>, current: u64, releases: serde_json::Value) -> TransformedMessage {
        let mut data = BTreeMap::new();
        data.insert(
            "no_of_releases".to_string(),
            ValueDelta::new(json!(previous), json!(current)),
        );
        data.insert("releases".to_string(), ValueDelta::new(json!(null), releases));
        TransformedMessage::Result(TransformedResult {
            meta_data: meta(at),
            data,
        })
    }

    #[test]
    fn two_new_releases_announced_oldest_first() {
        let mut alerter = RepoAlerter::new("repo-alerter");
        let releases = json!({
            "0": {"release_name": "v2.1", "tag_name": "v2.1.0"},
            "1": {"release_name": "v2.0", "tag_name": "v2.0.0"},
            "2": {"release_name": "v1.9", "tag_name": "v1.9.0"},
        });
        let alerts = alerter.classify(&result(100.0, Some(3), 5, releases));
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].message.contains("v2.0.0"));
        assert!(alerts[1].message.contains("v2.1.0"));
        assert!(alerts.iter().all(|a| a.severity == Severity::Info));
    }

    #[test]
    fn first_sight_never_announces() {
        let mut alerter = RepoAlerter::new("repo-alerter");
        let alerts = alerter.classify(&result(100.0, None, 5, json!({})));
        assert!(alerts.is_empty());
    }

    #[test]
    fn access_error_then_recovery() {
        let mut alerter = RepoAlerter::new("repo-alerter");
        let error = TransformedMessage::Error(TransformedError {
            meta_data: meta(100.0),
            error: MonitoringError::cannot_access("https://api.github.com/..."),
            data: BTreeMap::new(),
        });

        assert_eq!(alerter.classify(&error).len(), 1);
        assert!(alerter.classify(&error).is_empty());

        let alerts = alerter.classify(&result(160.0, Some(5), 5, json!({})));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_code.name, "repo_page_accessible_again");
    }

    #[test]
    fn component_reset_drops_the_access_flag() {
        let mut alerter = RepoAlerter::new("repo-alerter");
        let error = TransformedMessage::Error(TransformedError {
            meta_data: meta(100.0),
            error: MonitoringError::cannot_access("https://api.github.com/..."),
            data: BTreeMap::new(),
        });
        assert_eq!(alerter.classify(&error).len(), 1);

        alerter.handle_reset("chain_A");

        // The error alerts afresh after the purge.
        assert_eq!(alerter.classify(&error).len(), 1);
    }
}
