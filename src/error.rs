//! Error types for the telemetry engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Malformed write request, rejected before it reaches the store
    #[error("Validation failed: {field} {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(#[from] sqlx::Error),

    #[error("Storage operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether this error came from the storage layer rather than the caller
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Timeout { .. })
    }
}

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<csv::Error> for TelemetryError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
