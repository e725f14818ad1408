//! Error types for configuration loading.

use thiserror::Error;

/// Errors that can occur while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A flat-map entry could not be parsed into its field type.
    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidValue {
        /// Setting name as given in the source mapping.
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },

    /// Neither a file name nor a host was configured.
    #[error("configuration names no database: set fileName or host")]
    MissingLocation,
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
