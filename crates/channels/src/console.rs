//! Console/log channel: alerts to stdout and the structured log.

use lookout_core::{Alert, Severity};

use crate::traits::{ChannelError, ChannelHandler};

#[derive(Debug, Default)]
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

pub fn format_alert(alert: &Alert) -> String {
    format!(
        "[{}] {} | {} | chain={} origin={}",
        alert.severity, alert.alert_code.name, alert.message, alert.parent_id, alert.origin_id
    )
}

#[async_trait::async_trait]
impl ChannelHandler for ConsoleChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let line = format_alert(alert);
        println!("{line}");
        match alert.severity {
            Severity::Critical | Severity::Error => tracing::error!(target: "alerts", "{line}"),
            Severity::Warning => tracing::warn!(target: "alerts", "{line}"),
            Severity::Info => tracing::info!(target: "alerts", "{line}"),
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::{AlertCode, Metric};

    #[test]
    fn formatted_line_carries_the_identity() {
        let alert = Alert {
            alert_code: AlertCode::new(2001, "system_cpu_usage_increased_above_threshold"),
            message: "host-a: system_cpu_usage increased above WARNING threshold (91.0)".into(),
            severity: Severity::Warning,
            timestamp: 1000.0,
            parent_id: "chain_A".into(),
            origin_id: "sys_1".into(),
            metric: Metric::new(3001, "system_cpu_usage"),
            metric_state_args: vec!["sys_1".into()],
        };
        let line = format_alert(&alert);
        assert!(line.starts_with("[WARNING]"));
        assert!(line.contains("chain=chain_A"));
        assert!(line.contains("origin=sys_1"));
    }
}
