use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("summary request was cancelled before work began")]
    Cancelled,
}
