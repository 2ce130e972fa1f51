//! GrafanaClient trait for mocking
//!
//! This trait abstracts the GrafanaClient to enable mocking in unit tests.
//! The concrete GrafanaClient implements this trait, and tests can use mock implementations.

use crate::error::GrafanaError;
use crate::models::*;

/// Trait for Grafana API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait GrafanaClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Query Grafana's health endpoint
    async fn health(&self) -> Result<HealthResponse, GrafanaError>;

    /// Find the folder titled after `namespace`, creating it if absent
    async fn get_or_create_namespace_folder(&self, namespace: &str) -> Result<Folder, GrafanaError>;

    /// Create or overwrite a dashboard inside the given folder
    async fn create_or_update_dashboard(
        &self,
        dashboard: &serde_json::Value,
        folder_id: i64,
    ) -> Result<DashboardResponse, GrafanaError>;

    /// Delete a dashboard by its UID
    async fn delete_dashboard_by_uid(&self, uid: &str) -> Result<DeleteResponse, GrafanaError>;
}
