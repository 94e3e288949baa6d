//! The Chainlink contract observer.
//!
//! A stateful on-chain scanner: discovers which price-feed aggregator
//! contracts each operator participates in, walks block ranges for
//! round-submission events across the two contract-version ABIs, and
//! advances per `(operator, proxy)` watermarks with correctness under
//! partial failure.

pub mod abi;
pub mod arena;
pub mod catalog;
pub mod observer;
pub mod rounds;

pub use arena::{Watermark, WatermarkArena};
pub use catalog::FeedCatalogEntry;
pub use observer::{ContractsObserver, EvmSource, OperatorConfig};
pub use rounds::{HistoricalRound, RoundData, RoundReader};
