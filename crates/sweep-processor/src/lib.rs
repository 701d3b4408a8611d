//! Sharded per-host result aggregate with grow-on-demand port arrays and
//! pooled allocations (§4.3).

pub mod error;
pub mod pool;
pub mod processor;
pub mod shard;

pub use error::ProcessError;
pub use pool::Pool;
pub use processor::{
    Processor,
    ProcessorSummary,
};
