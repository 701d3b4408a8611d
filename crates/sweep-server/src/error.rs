use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to read configuration file {path}: {source}")]
    ReadConfig { path: String, source: std::io::Error },

    #[error(transparent)]
    Config(#[from] sweep_core::ConfigError),
}
