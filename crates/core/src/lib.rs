pub mod alert;
pub mod config;
pub mod entity;
pub mod error;
pub mod timing;

pub use alert::{Alert, AlertCode, Metric, MetricIdentity, Severity};
pub use config::{load_dotenv, ConfigError, Environment};
pub use entity::{EntityId, EntityKind, RepoState, SystemState};
pub use error::{ErrorCode, MonitoringError};
pub use timing::TimedGate;

/// Current wall-clock time as f64 epoch seconds, the timestamp format used
/// everywhere on the wire and in persisted state.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
