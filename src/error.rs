//! Error types for the relay guard.

use thiserror::Error;

/// Main error type for relay guard operations.
///
/// Throttle and abuse checks never fail; only construction, configuration
/// loading and serving can produce one of these.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parsed but holds values the components cannot work with
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

/// Result type alias for relay guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
