//! Error types for the blockplane control plane
//!
//! Provides structured error types for all components: request validation,
//! persistence, backend drivers, connectors, and the orchestrator.

use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Operation blocked by resource state: {0}")]
    Conflict(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend command failed: {command}: {reason}")]
    BackendExecution { command: String, reason: String },

    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("No device found for {resource} after {attempts} attempts")]
    DiscoveryTimeout { resource: String, attempts: u32 },

    #[error("Method {method} is not implemented")]
    NotImplemented { method: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(kind: &str, name: &str) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    /// Convenience constructor for [`Error::NotImplemented`].
    pub fn not_implemented(method: &str) -> Self {
        Error::NotImplemented {
            method: method.to_string(),
        }
    }

    /// Whether the error denotes a missing resource. Delete paths use this to
    /// treat backend-side not-found as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether the error is a terminal response for an optional capability,
    /// as opposed to a failure of a supported one.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented { .. })
    }

    /// Whether retrying the same request unchanged could ever succeed.
    /// Validation and conflict errors require the caller to change something
    /// first; the orchestrator itself never retries either way.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_)
                | Error::Conflict(_)
                | Error::NotImplemented { .. }
                | Error::Configuration(_)
        )
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = Error::not_found("volume", "vol-1");
        assert!(err.is_not_found());
        assert!(err.is_retryable());

        let err = Error::Conflict("volume has snapshots".into());
        assert!(!err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_implemented_classification() {
        let err = Error::not_implemented("create_volume_group");
        assert!(err.is_not_implemented());
        assert!(!err.is_retryable());
    }
}
