//! Test utilities for unit testing reconcilers
//!
//! An in-memory [`FakeCluster`], fixture builders and a reconciler wired to a
//! `MockGrafanaClient`.

use crate::cluster::Cluster;
use crate::config::parse_selectors;
use crate::error::ControllerError;
use crate::pipeline::DashboardPipeline;
use crate::reconciler::{ClientFactory, Reconciler};
use crate::registry::Registry;
use crate::state::ControllerState;
use async_trait::async_trait;
use crds::{GrafanaDashboard, GrafanaDashboardSpec, GrafanaDashboardStatus};
use grafana_client::{GrafanaClientTrait, MockGrafanaClient};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Helper to create a dashboard labelled `app=grafana`
pub fn create_test_dashboard(namespace: &str, name: &str, json: &str) -> GrafanaDashboard {
    create_labelled_dashboard(namespace, name, json, &[("app", "grafana")])
}

/// Helper to create a dashboard with explicit labels
pub fn create_labelled_dashboard(
    namespace: &str,
    name: &str,
    json: &str,
    labels: &[(&str, &str)],
) -> GrafanaDashboard {
    GrafanaDashboard {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        },
        spec: GrafanaDashboardSpec {
            json: json.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Dashboard JSON with a fixed uid
pub fn dashboard_json(uid: &str, title: &str) -> String {
    serde_json::json!({ "uid": uid, "title": title }).to_string()
}

/// Ready state selecting `app=grafana`, no namespace selector
pub fn create_test_state() -> ControllerState {
    ControllerState {
        grafana_ready: true,
        grafana_url: "http://test-grafana".to_string(),
        admin_username: "admin".to_string(),
        admin_password: "secret".to_string(),
        client_timeout: Duration::from_secs(1),
        dashboard_selectors: Some(parse_selectors("app=grafana").unwrap()),
        namespace_selector: None,
    }
}

#[derive(Debug, Default)]
struct FakeClusterData {
    dashboards: BTreeMap<(String, String), GrafanaDashboard>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    config_maps: HashMap<(String, String, String), String>,
    failing_lists: BTreeSet<String>,
    list_calls: usize,
    namespace_lookups: usize,
    status_patches: Vec<(String, String, GrafanaDashboardStatus)>,
}

/// In-memory [`Cluster`]; status patches are written back to the stored objects
#[derive(Debug, Default)]
pub struct FakeCluster {
    data: Mutex<FakeClusterData>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dashboard(&self, dashboard: GrafanaDashboard) {
        let key = (dashboard.namespace().unwrap_or_default(), dashboard.name_any());
        self.data.lock().unwrap().dashboards.insert(key, dashboard);
    }

    /// Replace the JSON of a stored dashboard, keeping its status
    pub fn set_json(&self, namespace: &str, name: &str, json: &str) {
        let mut data = self.data.lock().unwrap();
        if let Some(dashboard) = data.dashboards.get_mut(&(namespace.to_string(), name.to_string())) {
            dashboard.spec.json = json.to_string();
        }
    }

    pub fn remove_dashboard(&self, namespace: &str, name: &str) {
        self.data
            .lock()
            .unwrap()
            .dashboards
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        self.data.lock().unwrap().namespaces.insert(
            name.to_string(),
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        );
    }

    pub fn add_config_map(&self, namespace: &str, name: &str, key: &str, value: &str) {
        self.data.lock().unwrap().config_maps.insert(
            (namespace.to_string(), name.to_string(), key.to_string()),
            value.to_string(),
        );
    }

    /// Make listing dashboards in `namespace` fail
    pub fn fail_list(&self, namespace: &str) {
        self.data.lock().unwrap().failing_lists.insert(namespace.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.data.lock().unwrap().list_calls
    }

    pub fn namespace_lookups(&self) -> usize {
        self.data.lock().unwrap().namespace_lookups
    }

    pub fn status_patches(&self) -> Vec<(String, String, GrafanaDashboardStatus)> {
        self.data.lock().unwrap().status_patches.clone()
    }

    pub fn status_of(&self, namespace: &str, name: &str) -> Option<GrafanaDashboardStatus> {
        self.data
            .lock()
            .unwrap()
            .dashboards
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|d| d.status.clone())
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn list_dashboards(&self, namespace: &str) -> Result<Vec<GrafanaDashboard>, ControllerError> {
        let mut data = self.data.lock().unwrap();
        data.list_calls += 1;
        if data.failing_lists.contains(namespace) {
            return Err(ControllerError::Watch(format!("injected list failure for {}", namespace)));
        }
        Ok(data
            .dashboards
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn get_dashboard(&self, namespace: &str, name: &str) -> Result<Option<GrafanaDashboard>, ControllerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .dashboards
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn dashboard_namespaces(&self) -> Result<BTreeSet<String>, ControllerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .dashboards
            .keys()
            .map(|(ns, _)| ns.clone())
            .collect())
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        let mut data = self.data.lock().unwrap();
        data.namespace_lookups += 1;
        data.namespaces
            .get(namespace)
            .cloned()
            .ok_or_else(|| ControllerError::NamespaceNotFound(namespace.to_string()))
    }

    async fn config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<Option<String>, ControllerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .config_maps
            .get(&(namespace.to_string(), name.to_string(), key.to_string()))
            .cloned())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GrafanaDashboardStatus,
    ) -> Result<(), ControllerError> {
        let mut data = self.data.lock().unwrap();
        data.status_patches
            .push((namespace.to_string(), name.to_string(), status.clone()));
        if let Some(dashboard) = data.dashboards.get_mut(&(namespace.to_string(), name.to_string())) {
            dashboard.status = Some(status.clone());
        }
        Ok(())
    }
}

/// Hands out the same mock client for every state
pub struct FixedClientFactory {
    pub client: MockGrafanaClient,
}

impl ClientFactory for FixedClientFactory {
    fn client(&self, _state: &ControllerState) -> Result<Arc<dyn GrafanaClientTrait>, ControllerError> {
        Ok(Arc::new(self.client.clone()))
    }
}

/// Reconciler over a fake cluster and a mock Grafana, with the real pipeline
pub fn create_test_reconciler(cluster: Arc<FakeCluster>, grafana: MockGrafanaClient) -> Reconciler {
    Reconciler::new(
        cluster.clone(),
        Arc::new(DashboardPipeline::new(cluster)),
        Arc::new(FixedClientFactory { client: grafana }),
        Arc::new(Registry::new()),
        TEST_REQUEUE_DELAY,
    )
}
