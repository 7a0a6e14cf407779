//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Configuration value cannot be empty: {0}")]
    EmptyValue(&'static str),

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Evaluator attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("Invalid log filter '{0}'")]
    InvalidLogFilter(String),
}
