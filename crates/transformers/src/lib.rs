//! lookout-transformers — raw observations to stateful snapshots.
//!
//! One transformer per entity kind. Each consumes its raw-data stream,
//! loads prior state from the store on first sight, computes derived
//! fields, and re-emits two streams: the flat save payload (store
//! exchange) and the `{previous, current}` alert payload (alert exchange).

pub mod contracts;
pub mod repo;
pub mod system;
pub mod transformer;
pub mod worker;

pub use transformer::{TransformError, Transformed, Transformer};
pub use worker::TransformerWorker;
