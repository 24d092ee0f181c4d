//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    // ─────────────────────────────────────────────────────────────
    // Command Bridge Errors
    // ─────────────────────────────────────────────────────────────
    /// The host rejected a command; `message` is the host's error string.
    #[error("{message}")]
    Bridge { message: String },

    #[error("Bridge command '{command}' timed out after {timeout_ms}ms")]
    BridgeTimeout { command: String, timeout_ms: u64 },

    #[error("Host bridge executable not found: {command}")]
    HostNotFound { command: String },

    #[error("Failed to spawn host bridge: {reason}")]
    HostSpawn { reason: String },

    #[error("Bridge protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Cache Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Cache error at {path}: {message}")]
    Cache { path: PathBuf, message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    pub fn bridge_timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::BridgeTimeout {
            command: command.into(),
            timeout_ms,
        }
    }

    pub fn host_spawn(reason: impl Into<String>) -> Self {
        Self::HostSpawn {
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn cache(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Cache {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error (dismiss/retry in the UI)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Bridge { .. }
                | Error::BridgeTimeout { .. }
                | Error::Protocol { .. }
                | Error::ChannelSend { .. }
                | Error::Validation { .. }
                | Error::Cache { .. }
        )
    }

    /// Check if this error should abort the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::HostNotFound { .. } | Error::HostSpawn { .. } | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_displays_host_message_verbatim() {
        let err = Error::bridge("Environment 'base' cannot be removed");
        assert_eq!(err.to_string(), "Environment 'base' cannot be removed");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::host_spawn("permission denied").is_fatal());
        assert!(Error::HostNotFound {
            command: "envpilot-host".into()
        }
        .is_fatal());
        assert!(!Error::bridge("test").is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::bridge("test").is_recoverable());
        assert!(Error::bridge_timeout("list_backend_services", 30_000).is_recoverable());
        assert!(Error::validation("name", "empty").is_recoverable());
        assert!(!Error::ChannelClosed.is_recoverable());
    }

    #[test]
    fn test_validation_error_message() {
        let err = Error::validation("environment name", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid environment name: must not be empty"
        );
    }

    #[test]
    fn test_timeout_message_names_command() {
        let err = Error::bridge_timeout("check_jupyter_server", 500);
        assert!(err.to_string().contains("check_jupyter_server"));
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn test_context_preserves_error() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.context("writing cache").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
