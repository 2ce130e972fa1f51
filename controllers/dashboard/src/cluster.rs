//! Kubernetes access used by the reconciler.
//!
//! The [`Cluster`] trait is the seam between reconciliation logic and the
//! Kubernetes API, so passes can be unit tested with an in-memory fake.

use crate::error::ControllerError;
use crds::{GrafanaDashboard, GrafanaDashboardStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Kubernetes operations needed by a reconciliation pass
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// All dashboards currently present in a namespace (one list call)
    async fn list_dashboards(&self, namespace: &str) -> Result<Vec<GrafanaDashboard>, ControllerError>;

    /// A single dashboard, `None` when it does not exist
    async fn get_dashboard(&self, namespace: &str, name: &str) -> Result<Option<GrafanaDashboard>, ControllerError>;

    /// Namespaces that currently hold at least one dashboard
    async fn dashboard_namespaces(&self) -> Result<BTreeSet<String>, ControllerError>;

    /// Labels of a namespace object; missing namespace is an error
    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, ControllerError>;

    /// Value of `key` in a ConfigMap, `None` when the ConfigMap or key is missing
    async fn config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<Option<String>, ControllerError>;

    /// Replace the status subresource of a dashboard
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GrafanaDashboardStatus,
    ) -> Result<(), ControllerError>;
}

/// [`Cluster`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    watch_namespace: Option<String>,
}

impl KubeCluster {
    pub fn new(client: Client, watch_namespace: Option<String>) -> Self {
        Self { client, watch_namespace }
    }

    fn dashboards(&self, namespace: &str) -> Api<GrafanaDashboard> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    async fn list_dashboards(&self, namespace: &str) -> Result<Vec<GrafanaDashboard>, ControllerError> {
        let list = self.dashboards(namespace).list(&ListParams::default()).await?;
        debug!("Listed {} dashboards in namespace {}", list.items.len(), namespace);
        Ok(list.items)
    }

    async fn get_dashboard(&self, namespace: &str, name: &str) -> Result<Option<GrafanaDashboard>, ControllerError> {
        Ok(self.dashboards(namespace).get_opt(name).await?)
    }

    async fn dashboard_namespaces(&self) -> Result<BTreeSet<String>, ControllerError> {
        if let Some(ns) = &self.watch_namespace {
            return Ok(BTreeSet::from([ns.clone()]));
        }

        let api: Api<GrafanaDashboard> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|d| d.metadata.namespace)
            .collect())
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get_opt(namespace)
            .await?
            .ok_or_else(|| ControllerError::NamespaceNotFound(namespace.to_string()))?;
        Ok(ns.metadata.labels.unwrap_or_default())
    }

    async fn config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<Option<String>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(name).await?;
        Ok(config_map
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(key)))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GrafanaDashboardStatus,
    ) -> Result<(), ControllerError> {
        let status_patch = serde_json::json!({ "status": status });
        let pp = PatchParams::default();
        self.dashboards(namespace)
            .patch_status(name, &pp, &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }
}
