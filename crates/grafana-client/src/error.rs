//! Grafana client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Grafana HTTP API
#[derive(Debug, Error)]
pub enum GrafanaError {
    /// HTTP request/response error (connection refused, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Grafana returned an unexpected status code
    #[error("Grafana API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Concurrent modification detected by Grafana (HTTP 409 / 412)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication failed (bad credentials, missing permissions)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client could not be constructed from the supplied settings
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl GrafanaError {
    /// Conflicts are benign: the object is current or a later pass corrects it.
    pub fn is_conflict(&self) -> bool {
        matches!(self, GrafanaError::Conflict(_))
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GrafanaError::Http(_) => true,
            GrafanaError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
