//! Boot-time environment configuration.
//!
//! All process-wide settings are gathered into a single immutable
//! [`Environment`] record constructed once at boot and passed down. Every
//! key is strict (absence is fatal) except the console-alerts flag.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable '{0}' is not set")]
    Missing(String),

    #[error("environment variable '{key}' has invalid value '{value}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

fn require(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

fn require_parsed<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let value = require(key)?;
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value,
        reason: e.to_string(),
    })
}

/// The full process environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Message broker endpoint.
    pub broker_host: String,
    pub broker_port: u16,

    /// Key-value store endpoint.
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,

    /// Deployer-unique identifier prefixed to every store key.
    pub namespace: String,

    /// Log filter passed to the tracing subscriber (e.g. "info").
    pub logging_level: String,

    /// Bounded publishing queue sizes.
    pub transformer_queue_size: usize,
    pub alerter_queue_size: usize,

    /// Monitoring periods, seconds.
    pub system_monitor_period: u64,
    pub repo_monitor_period: u64,
    pub node_monitor_period: u64,
    pub contracts_monitor_period: u64,

    /// Mirror alerts to stdout (the only lenient key; default off).
    pub enable_console_alerts: bool,
}

impl Environment {
    /// Read the environment, failing fast on any missing required key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            broker_host: require("BROKER_HOST")?,
            broker_port: require_parsed("BROKER_PORT")?,
            redis_host: require("REDIS_HOST")?,
            redis_port: require_parsed("REDIS_PORT")?,
            redis_db: require_parsed("REDIS_DB")?,
            namespace: require("UNIQUE_IDENTIFIER")?,
            logging_level: require("LOGGING_LEVEL")?,
            transformer_queue_size: require_parsed("TRANSFORMER_QUEUE_SIZE")?,
            alerter_queue_size: require_parsed("ALERTER_QUEUE_SIZE")?,
            system_monitor_period: require_parsed("SYSTEM_MONITOR_PERIOD_SECONDS")?,
            repo_monitor_period: require_parsed("REPO_MONITOR_PERIOD_SECONDS")?,
            node_monitor_period: require_parsed("NODE_MONITOR_PERIOD_SECONDS")?,
            contracts_monitor_period: require_parsed("CONTRACTS_MONITOR_PERIOD_SECONDS")?,
            enable_console_alerts: env::var("ENABLE_CONSOLE_ALERTS")
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "yes" | "y" | "1"))
                .unwrap_or(false),
        })
    }

    /// Log a redacted summary at startup.
    pub fn log_summary(&self) {
        tracing::info!("environment loaded:");
        tracing::info!("  broker:  {}:{}", self.broker_host, self.broker_port);
        tracing::info!(
            "  redis:   {}:{}/{}",
            self.redis_host,
            self.redis_port,
            self.redis_db
        );
        tracing::info!("  namespace: {}", self.namespace);
        tracing::info!(
            "  periods: system={}s repo={}s node={}s contracts={}s",
            self.system_monitor_period,
            self.repo_monitor_period,
            self.node_monitor_period,
            self.contracts_monitor_period
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_full_env() {
        let pairs = [
            ("BROKER_HOST", "127.0.0.1"),
            ("BROKER_PORT", "5672"),
            ("REDIS_HOST", "127.0.0.1"),
            ("REDIS_PORT", "6379"),
            ("REDIS_DB", "10"),
            ("UNIQUE_IDENTIFIER", "lookout_test"),
            ("LOGGING_LEVEL", "info"),
            ("TRANSFORMER_QUEUE_SIZE", "1000"),
            ("ALERTER_QUEUE_SIZE", "1000"),
            ("SYSTEM_MONITOR_PERIOD_SECONDS", "60"),
            ("REPO_MONITOR_PERIOD_SECONDS", "3600"),
            ("NODE_MONITOR_PERIOD_SECONDS", "30"),
            ("CONTRACTS_MONITOR_PERIOD_SECONDS", "300"),
        ];
        for (k, v) in pairs {
            env::set_var(k, v);
        }
    }

    // Environment variables are process-global, so everything runs in one
    // test to avoid interleaving with parallel test threads.
    #[test]
    fn environment_contract() {
        set_full_env();
        env::remove_var("ENABLE_CONSOLE_ALERTS");
        let environment = Environment::from_env().unwrap();
        assert_eq!(environment.broker_port, 5672);
        assert_eq!(environment.namespace, "lookout_test");
        assert!(!environment.enable_console_alerts);

        // The console flag is the only lenient key.
        env::set_var("ENABLE_CONSOLE_ALERTS", "YES");
        assert!(Environment::from_env().unwrap().enable_console_alerts);
        env::set_var("ENABLE_CONSOLE_ALERTS", "off");
        assert!(!Environment::from_env().unwrap().enable_console_alerts);
        env::remove_var("ENABLE_CONSOLE_ALERTS");

        // Unparseable values name the offending key.
        env::set_var("BROKER_PORT", "not-a-port");
        let err = Environment::from_env().unwrap_err();
        assert!(err.to_string().contains("BROKER_PORT"));
        env::set_var("BROKER_PORT", "5672");
    }
}
