use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] sweep_core::ConfigError),

    #[error("scanner error: {0}")]
    Scanner(String),

    #[error("store error: {0}")]
    Store(#[from] sweep_store::StoreError),

    #[error("processor error: {0}")]
    Process(#[from] sweep_processor::ProcessError),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("cycle cancelled")]
    Cancelled,
}
