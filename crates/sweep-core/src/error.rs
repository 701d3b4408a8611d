use thiserror::Error;

/// Errors surfaced while decoding or validating a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to decode configuration blob: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("no usable target source: networks is empty and device_targets is empty")]
    NoTargetSource,
}
