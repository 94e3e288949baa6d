//! lookout-confeed — the config fan-out.
//!
//! Watches a config directory tree by polling (so containerized mounts
//! are observed), parses changed files, and publishes
//! `section → {option: value}` documents on the config exchange with a
//! routing key derived from the relative path. Downstream components
//! subscribe to the subtrees they care about.

pub mod scanner;
pub mod worker;

pub use scanner::{diff, parse_document, routing_key_for, scan, ChangeKind, Snapshot};
pub use worker::ConfigFeedWorker;
