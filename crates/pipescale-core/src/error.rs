//! Error types for policy loading and validation.

use thiserror::Error;

/// Result type alias for policy operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading a `ControllerPolicy`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy: {0}")]
    Parse(String),

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("invalid policy: {0}")]
    Invalid(String),
}
