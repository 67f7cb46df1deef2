//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a config file.
    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Cache policy file is neither valid JSON nor valid YAML.
    #[error("failed to parse cache policy file '{path}': {message}")]
    ParsePolicies { path: String, message: String },

    /// A value is out of range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Other error.
    #[error("{0}")]
    Other(String),
}
