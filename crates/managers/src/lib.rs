//! lookout-managers — worker supervision.
//!
//! A manager owns a table of child worker processes, restarts dead ones,
//! answers broker pings with an aggregate heartbeat, and emits a
//! `ComponentReset` alert before every (re)start so downstream state is
//! purged before the child produces anything new.

pub mod families;
pub mod health;
pub mod supervisor;
pub mod worker;

pub use families::{AlertersFamily, Family, MonitorsFamily};
pub use health::HealthChecker;
pub use supervisor::{ChildSpec, ResetPublisher, Supervisor};
pub use worker::ManagerWorker;

/// Chain name from a config path like `chains/chainlink/bsc/nodes_config`:
/// the directory the document sits in.
pub fn chain_name_from_config_path(path: &str) -> Option<&str> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop()?;
    segments.pop()
}
