//! Mock GrafanaClient for unit testing
//!
//! Stores folders and dashboards in memory, records every call, and can be
//! told to fail specific operations so reconcilers can be tested without a
//! running Grafana instance.

use crate::error::GrafanaError;
use crate::grafana_trait::GrafanaClientTrait;
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Health,
    GetOrCreateFolder(String),
    CreateOrUpdate { uid: String, folder_id: i64 },
    Delete(String),
}

/// Failure to inject for a specific key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Api(u16),
    Conflict,
    NotFound,
}

impl MockFailure {
    fn to_error(&self, what: &str) -> GrafanaError {
        match self {
            MockFailure::Api(status) => GrafanaError::Api {
                status: *status,
                message: format!("injected failure for {}", what),
            },
            MockFailure::Conflict => GrafanaError::Conflict(format!("injected conflict for {}", what)),
            MockFailure::NotFound => GrafanaError::NotFound(format!("injected not found for {}", what)),
        }
    }
}

/// A dashboard held by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDashboard {
    pub folder_id: i64,
    pub model: serde_json::Value,
    pub version: i64,
}

/// Mock GrafanaClient for testing
#[derive(Debug, Clone)]
pub struct MockGrafanaClient {
    pub(crate) base_url: String,
    pub(crate) healthy: Arc<Mutex<bool>>,
    pub(crate) folders: Arc<Mutex<HashMap<String, Folder>>>,
    pub(crate) dashboards: Arc<Mutex<HashMap<String, StoredDashboard>>>,
    pub(crate) calls: Arc<Mutex<Vec<MockCall>>>,
    pub(crate) create_failures: Arc<Mutex<HashMap<String, MockFailure>>>,
    pub(crate) delete_failures: Arc<Mutex<HashMap<String, MockFailure>>>,
    pub(crate) folder_failures: Arc<Mutex<HashMap<String, MockFailure>>>,
    pub(crate) create_delays: Arc<Mutex<HashMap<String, Duration>>>,
    pub(crate) next_id: Arc<Mutex<i64>>,
}

impl MockGrafanaClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            healthy: Arc::new(Mutex::new(true)),
            folders: Arc::new(Mutex::new(HashMap::new())),
            dashboards: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            create_failures: Arc::new(Mutex::new(HashMap::new())),
            delete_failures: Arc::new(Mutex::new(HashMap::new())),
            folder_failures: Arc::new(Mutex::new(HashMap::new())),
            create_delays: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Make `create_or_update_dashboard` fail for a dashboard UID
    pub fn fail_create(&self, uid: &str, failure: MockFailure) {
        self.create_failures.lock().unwrap().insert(uid.to_string(), failure);
    }

    /// Make `delete_dashboard_by_uid` fail for a dashboard UID
    pub fn fail_delete(&self, uid: &str, failure: MockFailure) {
        self.delete_failures.lock().unwrap().insert(uid.to_string(), failure);
    }

    /// Make `create_or_update_dashboard` answer only after `delay` for a dashboard UID
    pub fn delay_create(&self, uid: &str, delay: Duration) {
        self.create_delays.lock().unwrap().insert(uid.to_string(), delay);
    }

    /// Make `get_or_create_namespace_folder` fail for a namespace
    pub fn fail_folder(&self, namespace: &str, failure: MockFailure) {
        self.folder_failures.lock().unwrap().insert(namespace.to_string(), failure);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.create_failures.lock().unwrap().clear();
        self.delete_failures.lock().unwrap().clear();
        self.folder_failures.lock().unwrap().clear();
    }

    /// Toggle the health endpoint
    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of create/update and delete calls (remote writes)
    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::CreateOrUpdate { .. } | MockCall::Delete(_)))
            .count()
    }

    /// Snapshot of a stored dashboard
    pub fn dashboard(&self, uid: &str) -> Option<StoredDashboard> {
        self.dashboards.lock().unwrap().get(uid).cloned()
    }

    /// Snapshot of a folder by namespace
    pub fn folder(&self, namespace: &str) -> Option<Folder> {
        self.folders.lock().unwrap().get(namespace).cloned()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self) -> i64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }
}

#[async_trait::async_trait]
impl GrafanaClientTrait for MockGrafanaClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health(&self) -> Result<HealthResponse, GrafanaError> {
        self.record(MockCall::Health);
        if *self.healthy.lock().unwrap() {
            Ok(HealthResponse {
                database: "ok".to_string(),
                version: Some("mock".to_string()),
                commit: None,
            })
        } else {
            Err(GrafanaError::Api {
                status: 503,
                message: "mock grafana unavailable".to_string(),
            })
        }
    }

    async fn get_or_create_namespace_folder(&self, namespace: &str) -> Result<Folder, GrafanaError> {
        self.record(MockCall::GetOrCreateFolder(namespace.to_string()));
        if let Some(failure) = self.folder_failures.lock().unwrap().get(namespace) {
            return Err(failure.to_error(namespace));
        }

        if let Some(folder) = self.folders.lock().unwrap().get(namespace) {
            return Ok(folder.clone());
        }

        let id = self.next_id();
        let folder = Folder {
            id: Some(id),
            uid: Some(format!("folder-{}", id)),
            title: namespace.to_string(),
        };
        self.folders.lock().unwrap().insert(namespace.to_string(), folder.clone());
        Ok(folder)
    }

    async fn create_or_update_dashboard(
        &self,
        dashboard: &serde_json::Value,
        folder_id: i64,
    ) -> Result<DashboardResponse, GrafanaError> {
        let uid = dashboard
            .get("uid")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GrafanaError::Api {
                status: 400,
                message: "dashboard uid missing".to_string(),
            })?;
        self.record(MockCall::CreateOrUpdate { uid: uid.clone(), folder_id });

        let delay = self.create_delays.lock().unwrap().get(&uid).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = self.create_failures.lock().unwrap().get(&uid) {
            return Err(failure.to_error(&uid));
        }

        let mut dashboards = self.dashboards.lock().unwrap();
        let version = dashboards.get(&uid).map(|d| d.version + 1).unwrap_or(1);
        dashboards.insert(
            uid.clone(),
            StoredDashboard {
                folder_id,
                model: dashboard.clone(),
                version,
            },
        );

        Ok(DashboardResponse {
            id: Some(self.next_id()),
            url: Some(format!("/d/{}", uid)),
            uid,
            status: Some("success".to_string()),
            version: Some(version),
        })
    }

    async fn delete_dashboard_by_uid(&self, uid: &str) -> Result<DeleteResponse, GrafanaError> {
        self.record(MockCall::Delete(uid.to_string()));
        if let Some(failure) = self.delete_failures.lock().unwrap().get(uid) {
            return Err(failure.to_error(uid));
        }

        match self.dashboards.lock().unwrap().remove(uid) {
            Some(removed) => Ok(DeleteResponse {
                title: removed.model.get("title").and_then(|v| v.as_str()).map(str::to_string),
                message: Some(format!("Dashboard {} deleted", uid)),
                id: None,
            }),
            None => Err(GrafanaError::NotFound(format!("dashboard {}", uid))),
        }
    }
}
