//! Prometheus text-format scraping helpers shared by the monitors.

use std::collections::HashMap;

use prometheus_parse::{Sample, Scrape, Value};

use lookout_core::{ErrorCode, MonitoringError};

use crate::error::MonitorError;

/// Fetch and parse a Prometheus metrics page.
pub async fn fetch_metrics(client: &reqwest::Client, url: &str) -> Result<Scrape, MonitorError> {
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    let lines = body.lines().map(|l| Ok(l.to_string()));
    Scrape::parse(lines).map_err(|e| {
        MonitoringError::new(
            ErrorCode::DataReading,
            format!("unparseable metrics page from {url}: {e}"),
        )
        .into()
    })
}

/// Numeric value of a sample, whatever its metric type.
pub fn sample_value(sample: &Sample) -> Option<f64> {
    match sample.value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(v),
        Value::Histogram(_) | Value::Summary(_) => None,
    }
}

/// First sample of a metric, by name.
pub fn find_sample<'a>(scrape: &'a Scrape, metric: &str) -> Option<&'a Sample> {
    scrape.samples.iter().find(|s| s.metric == metric)
}

/// Value of the first sample of a metric, erroring if absent.
pub fn require_value(scrape: &Scrape, metric: &str) -> Result<f64, MonitorError> {
    find_sample(scrape, metric)
        .and_then(sample_value)
        .ok_or_else(|| {
            MonitoringError::new(
                ErrorCode::MetricNotFound,
                format!("metric '{metric}' not found"),
            )
            .into()
        })
}

/// Sum of a metric across its label sets, optionally skipping one device
/// label value (e.g. the loopback interface).
pub fn sum_values(scrape: &Scrape, metric: &str, skip_device: Option<&str>) -> Option<f64> {
    let mut sum = 0.0;
    let mut seen = false;
    for sample in scrape.samples.iter().filter(|s| s.metric == metric) {
        if let Some(device) = skip_device {
            if sample.labels.get("device") == Some(device) {
                continue;
            }
        }
        if let Some(value) = sample_value(sample) {
            sum += value;
            seen = true;
        }
    }
    seen.then_some(sum)
}

/// All label maps of a metric's samples, used for label-carried data such
/// as the operator `account` on `eth_balance`.
pub fn labels_of<'a>(scrape: &'a Scrape, metric: &str) -> Vec<HashMap<String, String>> {
    scrape
        .samples
        .iter()
        .filter(|s| s.metric == metric)
        .map(|s| {
            s.labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Scrape {
        Scrape::parse(text.lines().map(|l| Ok(l.to_string()))).unwrap()
    }

    const PAGE: &str = "\
# HELP node_network_transmit_bytes_total Network device statistic.
# TYPE node_network_transmit_bytes_total counter
node_network_transmit_bytes_total{device=\"eth0\"} 1000
node_network_transmit_bytes_total{device=\"lo\"} 500
# TYPE process_open_fds gauge
process_open_fds 64
# TYPE eth_balance gauge
eth_balance{account=\"0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B\"} 7.5
";

    #[test]
    fn sums_skip_the_named_device() {
        let scrape = parse(PAGE);
        assert_eq!(
            sum_values(&scrape, "node_network_transmit_bytes_total", Some("lo")),
            Some(1000.0)
        );
        assert_eq!(
            sum_values(&scrape, "node_network_transmit_bytes_total", None),
            Some(1500.0)
        );
        assert_eq!(sum_values(&scrape, "missing_metric", None), None);
    }

    #[test]
    fn require_value_errors_on_missing_metric() {
        let scrape = parse(PAGE);
        assert_eq!(require_value(&scrape, "process_open_fds").unwrap(), 64.0);
        let err = require_value(&scrape, "nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn labels_carry_the_operator_account() {
        let scrape = parse(PAGE);
        let labels = labels_of(&scrape, "eth_balance");
        assert_eq!(labels.len(), 1);
        assert_eq!(
            labels[0].get("account").map(String::as_str),
            Some("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B")
        );
    }
}
