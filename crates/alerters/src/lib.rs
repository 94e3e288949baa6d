//! lookout-alerters — threshold and transition rules over transformed
//! snapshots.
//!
//! Alerters consume the `{previous, current}` alert stream, evaluate
//! per-chain rulesets, deduplicate by alert identity and emit alert
//! records to the alert exchange. Rulesets arrive through the config
//! fan-out and are managed by [`AlertsConfigFactory`].

pub mod alerter;
pub mod contracts;
pub mod factory;
pub mod repo;
pub mod system;
pub mod thresholds;

pub use alerter::{Alerter, AlerterWorker};
pub use factory::{AlertsConfigFactory, FactoryError, FlatConfig, FromFlatConfig};
pub use thresholds::{Decision, LadderTracker, ThresholdLadder, TransitionFlags};
