//! Controller-specific error types.
//!
//! This module defines error types specific to the dashboard controller
//! that are not covered by upstream library errors.

use grafana_client::GrafanaError;
use kube::Error as KubeError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the dashboard controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Grafana API error
    #[error("Grafana error: {0}")]
    Grafana(#[from] GrafanaError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dashboard could not be rendered into a Grafana payload
    #[error("Cannot process dashboard: {0}")]
    Render(String),

    /// Label selector is malformed
    #[error("Invalid label selector: {0}")]
    InvalidSelector(String),

    /// Namespace object does not exist
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// External call exceeded the configured client timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Conflicts are suppressed: the object is presumed current.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Grafana(e) if e.is_conflict())
    }

    /// Failures expected to clear up on their own (timeouts, 5xx, transport).
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Timeout(_) => true,
            ControllerError::Grafana(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Run an external call under the client timeout.
///
/// Expiry maps to [`ControllerError::Timeout`], which callers treat as a
/// retryable per-resource failure.
pub async fn with_timeout<T, E, F>(timeout: Duration, what: &str, call: F) -> Result<T, ControllerError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ControllerError>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ControllerError::Timeout(format!("{} exceeded {:?}", what, timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        let err = ControllerError::Grafana(GrafanaError::Conflict("412".to_string()));
        assert!(err.is_conflict());
        assert!(!ControllerError::Render("bad json".to_string()).is_conflict());
    }

    #[test]
    fn test_transient_detection() {
        assert!(ControllerError::Timeout("health".to_string()).is_transient());
        let server = ControllerError::Grafana(GrafanaError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        });
        assert!(server.is_transient());
        assert!(!ControllerError::Render("bad json".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), ControllerError> = with_timeout(
            Duration::from_millis(10),
            "never",
            std::future::pending::<Result<(), ControllerError>>(),
        )
        .await;
        assert!(matches!(result, Err(ControllerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_converts_errors() {
        let result: Result<(), ControllerError> = with_timeout(
            Duration::from_secs(1),
            "lookup",
            async { Err(GrafanaError::NotFound("x".to_string())) },
        )
        .await;
        assert!(matches!(result, Err(ControllerError::Grafana(GrafanaError::NotFound(_)))));
    }
}
