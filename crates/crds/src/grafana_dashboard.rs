//! GrafanaDashboard Custom Resource Definition
//!
//! Declares a dashboard that the dashboard controller keeps in sync with a
//! Grafana instance. The namespace of the resource decides the Grafana folder
//! the dashboard lands in.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// GrafanaDashboardSpec defines the desired content of a Grafana dashboard
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "integreatly.org",
    version = "v1alpha1",
    kind = "GrafanaDashboard",
    namespaced,
    status = "GrafanaDashboardStatus",
    shortname = "gd"
)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDashboardSpec {
    /// Inline dashboard JSON, as exported from Grafana
    #[serde(default)]
    pub json: String,

    /// ConfigMap key holding the dashboard JSON (used when `json` is empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ConfigMapKeyRef>,

    /// Datasource input substitutions (`${inputName}` -> datasource name)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DatasourceInput>,

    /// Grafana plugins this dashboard depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<GrafanaPlugin>,
}

/// Reference to a key inside a ConfigMap in the dashboard's namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapKeyRef {
    /// ConfigMap name
    pub name: String,

    /// Key within the ConfigMap data
    pub key: String,
}

/// Maps a dashboard input placeholder onto a concrete datasource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceInput {
    /// Input name as it appears in the dashboard (without `${` `}`)
    pub input_name: String,

    /// Name of the datasource to substitute
    pub datasource_name: String,
}

/// A Grafana plugin required by a dashboard
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrafanaPlugin {
    /// Plugin id (e.g. "grafana-piechart-panel")
    pub name: String,

    /// Plugin version
    pub version: String,
}

/// GrafanaDashboardStatus defines the observed state of a dashboard
///
/// Carries no timestamps: a status patch must be a no-op when nothing changed,
/// otherwise every patch would trigger another reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDashboardStatus {
    /// Outcome of the last reconciliation of this dashboard
    pub phase: DashboardPhase,

    /// Human readable detail (error message on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Grafana UID of the submitted dashboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Content hash of the last submitted revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Dashboard reconciliation phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum DashboardPhase {
    #[default]
    Pending,
    Reconciled,
    Failed,
}
