//! Error types for the ticket dispatcher.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// Ticketing backend errors.
///
/// None of these ever reach a chat user verbatim; the dispatcher logs them
/// and replies with the generic error text.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend {backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend {backend} failed to create ticket: {reason}")]
    CreateFailed { backend: String, reason: String },

    #[error("Invalid response from {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),
}

/// Key-value store errors.
///
/// The in-memory store never fails; durable stores report through `Backend`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend failure: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_converts_into_top_level() {
        let err: Error = BackendError::Timeout(Duration::from_secs(2)).into();
        assert!(matches!(err, Error::Backend(BackendError::Timeout(_))));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn config_error_names_missing_variable() {
        let err = ConfigError::MissingEnvVar("LINEAR_API_KEY".into());
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: LINEAR_API_KEY"
        );
    }
}
