//! Turns a `GrafanaDashboard` resource into the payload submitted to Grafana.
//!
//! The raw JSON comes either inline from the resource or from a ConfigMap
//! key. Rendering is skipped entirely when the content hash equals the hash
//! recorded for the last successful apply.

use crate::cluster::Cluster;
use crate::error::ControllerError;
use crate::hasher::{fingerprint, DashboardContent};
use crds::GrafanaDashboard;
use kube::ResourceExt;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Grafana limits dashboard UIDs to 40 characters
const MAX_UID_LENGTH: usize = 40;

/// Result of rendering a dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// `None` when the content is unchanged since the last apply
    pub payload: Option<Value>,
    /// Fingerprint of the current content
    pub hash: String,
}

/// Produces Grafana payloads from dashboard resources
#[async_trait::async_trait]
pub trait DashboardRenderer: Send + Sync {
    async fn render(&self, dashboard: &GrafanaDashboard, known_hash: Option<&str>) -> Result<Rendered, ControllerError>;
}

/// Renders dashboards from inline JSON or a referenced ConfigMap
pub struct DashboardPipeline {
    cluster: Arc<dyn Cluster>,
}

impl DashboardPipeline {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self { cluster }
    }

    async fn source_json(&self, dashboard: &GrafanaDashboard) -> Result<String, ControllerError> {
        if !dashboard.spec.json.trim().is_empty() {
            return Ok(dashboard.spec.json.clone());
        }

        let namespace = dashboard.namespace().unwrap_or_default();
        match &dashboard.spec.config_map_ref {
            Some(reference) => self
                .cluster
                .config_map_value(&namespace, &reference.name, &reference.key)
                .await?
                .ok_or_else(|| {
                    ControllerError::Render(format!(
                        "key {} not found in config map {}/{}",
                        reference.key, namespace, reference.name
                    ))
                }),
            None => Err(ControllerError::Render(format!(
                "dashboard {}/{} has neither json nor configMapRef",
                namespace,
                dashboard.name_any()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl DashboardRenderer for DashboardPipeline {
    async fn render(&self, dashboard: &GrafanaDashboard, known_hash: Option<&str>) -> Result<Rendered, ControllerError> {
        let json = self.source_json(dashboard).await?;
        let hash = fingerprint(&DashboardContent {
            json: &json,
            datasources: &dashboard.spec.datasources,
            plugins: &dashboard.spec.plugins,
        });

        if known_hash == Some(hash.as_str()) {
            debug!("Dashboard {}/{} unchanged", dashboard.namespace().unwrap_or_default(), dashboard.name_any());
            return Ok(Rendered { payload: None, hash });
        }

        let payload = build_payload(dashboard, &json)?;
        Ok(Rendered {
            payload: Some(payload),
            hash,
        })
    }
}

fn build_payload(dashboard: &GrafanaDashboard, json: &str) -> Result<Value, ControllerError> {
    let mut text = json.to_string();
    for input in &dashboard.spec.datasources {
        text = text.replace(&format!("${{{}}}", input.input_name), &input.datasource_name);
    }

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| ControllerError::Render(format!("invalid dashboard json: {}", e)))?;
    let Value::Object(mut model) = value else {
        return Err(ControllerError::Render("dashboard json must be an object".to_string()));
    };

    // Grafana assigns its own numeric ids; a stale one makes the save fail.
    model.remove("id");

    if !has_uid(&model) {
        let uid = default_uid(&dashboard.namespace().unwrap_or_default(), &dashboard.name_any());
        model.insert("uid".to_string(), Value::String(uid));
    }

    Ok(Value::Object(model))
}

fn has_uid(model: &Map<String, Value>) -> bool {
    model
        .get("uid")
        .and_then(Value::as_str)
        .is_some_and(|uid| !uid.is_empty())
}

/// Stable UID for dashboards that do not declare one
pub fn default_uid(namespace: &str, name: &str) -> String {
    let mut uid = format!("{:x}", Sha256::digest(format!("{}/{}", namespace, name).as_bytes()));
    uid.truncate(MAX_UID_LENGTH);
    uid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_dashboard, FakeCluster};
    use crds::{ConfigMapKeyRef, DatasourceInput};

    fn pipeline(cluster: FakeCluster) -> DashboardPipeline {
        DashboardPipeline::new(Arc::new(cluster))
    }

    #[tokio::test]
    async fn test_render_inline_json() {
        let dashboard = create_test_dashboard("ns1", "a", r#"{"uid": "abc", "id": 12, "title": "A"}"#);
        let rendered = pipeline(FakeCluster::new()).render(&dashboard, None).await.unwrap();
        let payload = rendered.payload.unwrap();
        assert_eq!(payload["uid"], "abc");
        assert_eq!(payload["title"], "A");
        assert!(payload.get("id").is_none());
        assert_eq!(rendered.hash.len(), 64);
    }

    #[tokio::test]
    async fn test_known_hash_skips_payload() {
        let dashboard = create_test_dashboard("ns1", "a", r#"{"uid": "abc"}"#);
        let p = pipeline(FakeCluster::new());
        let first = p.render(&dashboard, None).await.unwrap();
        let second = p.render(&dashboard, Some(&first.hash)).await.unwrap();
        assert!(second.payload.is_none());
        assert_eq!(first.hash, second.hash);

        let stale = p.render(&dashboard, Some("something-else")).await.unwrap();
        assert!(stale.payload.is_some());
    }

    #[tokio::test]
    async fn test_missing_uid_is_stable() {
        let dashboard = create_test_dashboard("ns1", "a", r#"{"title": "A", "uid": ""}"#);
        let p = pipeline(FakeCluster::new());
        let first = p.render(&dashboard, None).await.unwrap().payload.unwrap();
        let second = p.render(&dashboard, None).await.unwrap().payload.unwrap();
        assert_eq!(first["uid"], second["uid"]);
        assert_eq!(first["uid"].as_str().unwrap().len(), MAX_UID_LENGTH);
        assert_ne!(default_uid("ns1", "a"), default_uid("ns2", "a"));
        assert_eq!(default_uid("ns1", "a"), "02b790a1ece7109f77d454b4632134deb03d21e7");
    }

    #[tokio::test]
    async fn test_datasource_substitution_changes_hash() {
        let mut dashboard = create_test_dashboard("ns1", "a", r#"{"uid": "abc", "datasource": "${DS_PROM}"}"#);
        let p = pipeline(FakeCluster::new());
        let before = p.render(&dashboard, None).await.unwrap();

        dashboard.spec.datasources = vec![DatasourceInput {
            input_name: "DS_PROM".to_string(),
            datasource_name: "Prometheus".to_string(),
        }];
        let after = p.render(&dashboard, Some(&before.hash)).await.unwrap();
        assert_ne!(before.hash, after.hash);
        assert_eq!(after.payload.unwrap()["datasource"], "Prometheus");
    }

    #[tokio::test]
    async fn test_invalid_json_is_render_error() {
        let dashboard = create_test_dashboard("ns1", "a", "{not json");
        let err = pipeline(FakeCluster::new()).render(&dashboard, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Render(_)));

        let dashboard = create_test_dashboard("ns1", "a", "[1, 2]");
        let err = pipeline(FakeCluster::new()).render(&dashboard, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Render(_)));
    }

    #[tokio::test]
    async fn test_config_map_source() {
        let cluster = FakeCluster::new();
        cluster.add_config_map("ns1", "dashboards", "a.json", r#"{"uid": "from-cm"}"#);

        let mut dashboard = create_test_dashboard("ns1", "a", "");
        dashboard.spec.config_map_ref = Some(ConfigMapKeyRef {
            name: "dashboards".to_string(),
            key: "a.json".to_string(),
        });
        let p = pipeline(cluster);
        let rendered = p.render(&dashboard, None).await.unwrap();
        assert_eq!(rendered.payload.unwrap()["uid"], "from-cm");

        dashboard.spec.config_map_ref = Some(ConfigMapKeyRef {
            name: "dashboards".to_string(),
            key: "missing.json".to_string(),
        });
        assert!(matches!(p.render(&dashboard, None).await, Err(ControllerError::Render(_))));
    }

    #[tokio::test]
    async fn test_no_source_is_render_error() {
        let dashboard = create_test_dashboard("ns1", "a", "  ");
        let err = pipeline(FakeCluster::new()).render(&dashboard, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Render(_)));
    }
}
