//! Sharded, deduplicating in-memory store of recent probe results (§4.2).

pub mod error;
pub mod shard;
pub mod store;

pub use error::StoreError;
pub use store::{
    ResultFilter,
    Store,
    SweepSummary,
};
pub use sweep_core::PortCount;
