//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable {name}: {reason}")]
    EnvError { name: String, reason: String },

    #[error("Failed to render configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("XDG directory error: {0}")]
    XdgError(String),
}
