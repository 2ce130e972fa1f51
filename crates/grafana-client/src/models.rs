//! Grafana API models
//!
//! Only the fields the controller reads are modelled; everything else in the
//! Grafana responses is ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Folder as returned by `/api/folders`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    /// Numeric folder id (absent on some Grafana versions for the General folder)
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uid: Option<String>,
    pub title: String,
}

impl Folder {
    /// Folder id to submit dashboards into; 0 is Grafana's General folder.
    pub fn folder_id(&self) -> i64 {
        self.id.unwrap_or(0)
    }
}

/// Body of `POST /api/dashboards/db`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRequest<'a> {
    pub dashboard: &'a serde_json::Value,
    pub folder_id: i64,
    pub overwrite: bool,
}

/// Response of `POST /api/dashboards/db`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardResponse {
    #[serde(default)]
    pub id: Option<i64>,
    pub uid: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
}

/// Response of `DELETE /api/dashboards/uid/:uid`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DeleteResponse {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
}

/// Response of `GET /api/health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub database: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

impl HealthResponse {
    /// Grafana reports `"database": "ok"` once it can serve API requests.
    pub fn is_ok(&self) -> bool {
        self.database == "ok"
    }
}
