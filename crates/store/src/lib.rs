//! lookout-store — durable per-entity state.
//!
//! A thin typed layer over Redis addressed by
//! `namespace:entity_kind:entity_id:field`, plus the store worker that
//! persists transformer save payloads and purges slices on
//! `ComponentReset`.

pub mod error;
pub mod keys;
pub mod redis_store;
pub mod worker;

pub use error::StoreError;
pub use keys::{entity_index_key, field_key, fields_index_key};
pub use redis_store::RedisStore;
pub use worker::StoreWorker;
