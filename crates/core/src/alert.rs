//! Alert records and their identity.
//!
//! Alerts are flat data records keyed by a stable `alert_code`; the pair
//! `(metric_code, metric_state_args)` is the alert identity under which an
//! alerter remembers the last severity it emitted, for deduplication and
//! resolution detection.

use serde::{Deserialize, Serialize};

/// Alert severity, ordered so that precedence comparisons read naturally
/// (`Severity::Critical > Severity::Warning`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of an alert class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCode {
    pub code: u32,
    pub name: String,
}

impl AlertCode {
    pub fn new(code: u32, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
        }
    }
}

/// The metric an alert is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub metric_code: u32,
    pub name: String,
}

impl Metric {
    pub fn new(metric_code: u32, name: impl Into<String>) -> Self {
        Self {
            metric_code,
            name: name.into(),
        }
    }
}

/// Key under which severity transitions are tracked for dedup/resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricIdentity {
    pub metric_code: u32,
    pub state_args: Vec<String>,
}

/// A fully-formed alert record as published to the alert exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_code: AlertCode,
    pub message: String,
    pub severity: Severity,
    pub timestamp: f64,
    pub parent_id: String,
    pub origin_id: String,
    pub metric: Metric,
    /// Ordered argument vector distinguishing instances of the same metric
    /// (e.g. `[origin_id]` or `[operator_id, proxy_address]`).
    pub metric_state_args: Vec<String>,
}

/// Alert code reserved for the out-of-band state purge signal.
pub const COMPONENT_RESET_CODE: u32 = 1000;
/// Metric code reserved for internal control alerts.
pub const INTERNAL_METRIC_CODE: u32 = 9000;

impl Alert {
    /// The dedup/resolution key of this alert.
    pub fn identity(&self) -> MetricIdentity {
        MetricIdentity {
            metric_code: self.metric.metric_code,
            state_args: self.metric_state_args.clone(),
        }
    }

    /// Control alert instructing downstream components to purge all state
    /// associated with `component_name` before it is restarted.
    pub fn component_reset(component_name: &str, parent_id: &str, timestamp: f64) -> Self {
        Self {
            alert_code: AlertCode::new(COMPONENT_RESET_CODE, "component_reset"),
            message: format!("{component_name} is being reset"),
            severity: Severity::Info,
            timestamp,
            parent_id: parent_id.to_string(),
            origin_id: component_name.to_string(),
            metric: Metric::new(INTERNAL_METRIC_CODE, "component_reset"),
            metric_state_args: vec![component_name.to_string()],
        }
    }

    /// Whether this is a `ComponentReset` purge signal.
    pub fn is_component_reset(&self) -> bool {
        self.alert_code.code == COMPONENT_RESET_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_and_wire_form() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"WARNING\"");
        let parsed: Severity = serde_json::from_str("\"CRITICAL\"").unwrap();
        assert_eq!(parsed, Severity::Critical);
    }

    #[test]
    fn identity_ignores_severity_and_message() {
        let mut a = Alert {
            alert_code: AlertCode::new(2001, "system_cpu_usage_increased_above_threshold"),
            message: "CPU at 91%".into(),
            severity: Severity::Warning,
            timestamp: 1000.0,
            parent_id: "chain_1".into(),
            origin_id: "sys_1".into(),
            metric: Metric::new(3001, "system_cpu_usage"),
            metric_state_args: vec!["sys_1".into()],
        };
        let id1 = a.identity();
        a.severity = Severity::Critical;
        a.message = "CPU at 97%".into();
        assert_eq!(id1, a.identity());
    }

    #[test]
    fn component_reset_round_trips() {
        let alert = Alert::component_reset("system-alerter", "chain_1", 1234.5);
        assert!(alert.is_component_reset());
        let json = serde_json::to_string(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert!(back.is_component_reset());
        assert_eq!(back.metric_state_args, vec!["system-alerter".to_string()]);
    }
}
