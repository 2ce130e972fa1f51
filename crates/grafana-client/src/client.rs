//! Grafana API client
//!
//! Implements the subset of the Grafana HTTP API used by the dashboard
//! controller: health, folders and dashboards.

use crate::common::HttpClient;
use crate::error::GrafanaError;
use crate::grafana_trait::GrafanaClientTrait;
use crate::models::*;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Grafana API client
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    http: HttpClient,
}

impl GrafanaClient {
    /// Create a new Grafana client
    ///
    /// # Arguments
    /// * `base_url` - Grafana base URL (e.g., "http://grafana-service:3000")
    /// * `username` - Admin user
    /// * `password` - Admin password
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Result<Self, GrafanaError> {
        if base_url.is_empty() {
            return Err(GrafanaError::InvalidConfig("cannot get grafana admin url".to_string()));
        }
        if username.is_empty() {
            return Err(GrafanaError::InvalidConfig("invalid credentials (username)".to_string()));
        }
        if password.is_empty() {
            return Err(GrafanaError::InvalidConfig("invalid credentials (password)".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, username, password),
        })
    }

    /// List folders visible to the admin user
    pub async fn list_folders(&self) -> Result<Vec<Folder>, GrafanaError> {
        self.http.get("/api/folders?limit=1000").await
    }

    /// Find a folder by exact title
    pub async fn find_folder(&self, title: &str) -> Result<Option<Folder>, GrafanaError> {
        let folders = self.list_folders().await?;
        Ok(folders.into_iter().find(|f| f.title == title))
    }

    /// Create a folder with the given title
    pub async fn create_folder(&self, title: &str) -> Result<Folder, GrafanaError> {
        debug!("Creating Grafana folder {}", title);
        self.http.post("/api/folders", &json!({ "title": title })).await
    }
}

#[async_trait::async_trait]
impl GrafanaClientTrait for GrafanaClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn health(&self) -> Result<HealthResponse, GrafanaError> {
        self.http.get("/api/health").await
    }

    async fn get_or_create_namespace_folder(&self, namespace: &str) -> Result<Folder, GrafanaError> {
        if let Some(folder) = self.find_folder(namespace).await? {
            return Ok(folder);
        }

        match self.create_folder(namespace).await {
            Ok(folder) => {
                info!("Created Grafana folder {} (id: {:?})", namespace, folder.id);
                Ok(folder)
            }
            // Created concurrently by someone else; read it back
            Err(e) if e.is_conflict() => self
                .find_folder(namespace)
                .await?
                .ok_or_else(|| GrafanaError::NotFound(format!("folder {}", namespace))),
            Err(e) => Err(e),
        }
    }

    async fn create_or_update_dashboard(
        &self,
        dashboard: &serde_json::Value,
        folder_id: i64,
    ) -> Result<DashboardResponse, GrafanaError> {
        let request = DashboardRequest {
            dashboard,
            folder_id,
            overwrite: true,
        };
        self.http.post("/api/dashboards/db", &request).await
    }

    async fn delete_dashboard_by_uid(&self, uid: &str) -> Result<DeleteResponse, GrafanaError> {
        let path = format!("/api/dashboards/uid/{}", urlencoding::encode(uid));
        self.http.delete(&path).await
    }
}
