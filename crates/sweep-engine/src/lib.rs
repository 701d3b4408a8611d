//! Sweep lifecycle orchestration (§4.5): target generation, concurrency
//! budgeting, the per-cycle scan/process/finalize pipeline, and config
//! hot-reload, wired against the collaborator contracts in §6.

pub mod engine;
pub mod error;
pub mod targets;
pub mod traits;

pub use engine::SweepEngine;
pub use error::EngineError;
pub use targets::generate_targets;
pub use traits::{
    DeviceRegistry,
    KvError,
    KvStore,
    RegistryError,
    ResultProcessorBackend,
    Scanner,
    ScannerError,
    StoreBackend,
};
