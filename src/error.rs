//! Error types for mconnect-core

use std::io;
use thiserror::Error;

/// Result type alias using ModelError
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model error types
///
/// Errors raised while mirroring the daemon's object graph. Only
/// [`ModelError::Channel`] and [`ModelError::DeviceNotFound`] normally reach
/// callers; the remaining variants are recovered locally and logged.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Remote call failed or the channel is unavailable
    #[error("Channel error: {0}")]
    Channel(String),

    /// A mirrored property arrived with an unexpected wire type
    #[error("Type mismatch for '{property}': expected {expected}")]
    TypeMismatch {
        /// Property name as exposed on the bus
        property: String,
        /// Expected wire type
        expected: &'static str,
    },

    /// Operation is intentionally unimplemented
    #[error("Not implemented: {0}")]
    Unsupported(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Signal arguments did not have the expected shape
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Subprocess launch failed
    #[error("Launch error: {0}")]
    Launch(String),

    /// Configuration or logging setup error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Create a Channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a TypeMismatch error
    pub fn type_mismatch(property: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            property: property.into(),
            expected,
        }
    }

    /// Create an Unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an InvalidSignal error
    pub fn invalid_signal(msg: impl Into<String>) -> Self {
        Self::InvalidSignal(msg.into())
    }

    /// Create a Launch error
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a Config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ModelError::channel("bus gone");
        assert!(matches!(err, ModelError::Channel(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ModelError::type_mismatch("Charging", "boolean");
        assert_eq!(
            err.to_string(),
            "Type mismatch for 'Charging': expected boolean"
        );

        let err = ModelError::unsupported("untrust");
        assert_eq!(err.to_string(), "Not implemented: untrust");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: ModelError = io_err.into();
        assert!(matches!(err, ModelError::Io(_)));
    }
}
