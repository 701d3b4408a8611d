use thiserror::Error;

/// The in-memory store path never fails; this exists so a future
/// durable-backed `Store` implementation has somewhere to put its errors
/// without changing the trait's signature (§4.2 "Failure semantics").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("underlying store backend failed: {0}")]
    Backend(String),
}
