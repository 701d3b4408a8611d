use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use sweep_core::{
    DeviceUpdate,
    ProbeResult,
    Target,
};
use sweep_processor::{
    ProcessError,
    ProcessorSummary,
};
use sweep_store::{
    ResultFilter,
    StoreError,
    SweepSummary,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scan failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device registry update failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv watch failed: {0}")]
    Failed(String),
}

/// Turns a batch of targets into a stream of probe results (§6). The actual
/// probe mechanics (raw sockets, SYN scanning, rate limiting) are explicitly
/// out of scope (§1) — this trait is the seam a real scanner plugs into.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, ctx: CancellationToken, targets: Vec<Target>) -> Result<BoxStream<'static, ProbeResult>, ScannerError>;

    async fn stop(&self, ctx: CancellationToken) -> Result<(), ScannerError>;

    /// Advisory concurrency budget computed by the engine (§4.5 "Concurrency
    /// budgeting"). Collaborators that bound their own parallelism (e.g. with
    /// a semaphore) may resize it here; the default is a no-op for scanners
    /// that manage their own limits from static config.
    async fn set_concurrency(&self, _limit: usize) {}
}

/// Pushes availability verdicts to an external device registry (§6).
/// Persisted storage and query operations on the registry side are out of
/// scope; only the write path the engine needs is modeled here.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn update_device(&self, update: DeviceUpdate) -> Result<(), RegistryError>;
}

/// Watches a key in an external configuration store, yielding the raw bytes
/// of each new blob (§6). Returns immediately (an already-closed stream)
/// when no KV store is configured (§4.5 `watchConfig`).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn watch(&self, ctx: CancellationToken, key: String) -> Result<BoxStream<'static, Vec<u8>>, KvError>;
}

/// The store contract (§6, §4.2). Implemented directly by
/// `sweep_store::Store`; a durable-backed alternative would wrap its
/// failures in `StoreError` per §4.2's failure semantics note.
pub trait StoreBackend: Send + Sync {
    fn save_result(&self, r: ProbeResult) -> Result<(), StoreError>;
    fn get_results(&self, filter: Option<&ResultFilter>) -> Result<Vec<ProbeResult>, StoreError>;
    fn get_sweep_summary(&self) -> Result<SweepSummary, StoreError>;
    fn prune_results(&self, age: Duration);
}

impl StoreBackend for sweep_store::Store {
    fn save_result(&self, r: ProbeResult) -> Result<(), StoreError> {
        sweep_store::Store::save_result(self, r)
    }

    fn get_results(&self, filter: Option<&ResultFilter>) -> Result<Vec<ProbeResult>, StoreError> {
        sweep_store::Store::get_results(self, filter)
    }

    fn get_sweep_summary(&self) -> Result<SweepSummary, StoreError> {
        sweep_store::Store::get_sweep_summary(self)
    }

    fn prune_results(&self, age: Duration) {
        sweep_store::Store::prune_results(self, age)
    }
}

/// The result-processor contract (§6, §4.3). Implemented directly by
/// `sweep_processor::Processor`.
#[async_trait]
pub trait ResultProcessorBackend: Send + Sync {
    fn process(&self, r: &mut ProbeResult) -> Result<(), ProcessError>;
    async fn get_summary(&self, ctx: &CancellationToken) -> Result<ProcessorSummary, ProcessError>;
    fn update_config(&self, port_count: usize);
}

#[async_trait]
impl ResultProcessorBackend for sweep_processor::Processor {
    fn process(&self, r: &mut ProbeResult) -> Result<(), ProcessError> {
        sweep_processor::Processor::process(self, r)
    }

    async fn get_summary(&self, ctx: &CancellationToken) -> Result<ProcessorSummary, ProcessError> {
        sweep_processor::Processor::get_summary(self, ctx).await
    }

    fn update_config(&self, port_count: usize) {
        sweep_processor::Processor::update_config(self, port_count)
    }
}
