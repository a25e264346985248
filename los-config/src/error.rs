use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing configuration keys: {}", keys.join(", "))]
    MissingKeys { keys: Vec<String> },

    #[error("invalid clinic number range: {0:?}")]
    InvalidClinicRange(String),
}
