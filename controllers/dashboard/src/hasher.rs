//! Content fingerprints for dashboards.
//!
//! The fingerprint covers everything that influences the payload submitted to
//! Grafana: the raw dashboard JSON plus the datasource substitutions and plugin
//! list. Inputs are hashed as-is, so malformed JSON still gets a fingerprint.

use crds::{DatasourceInput, GrafanaPlugin};
use sha2::{Digest, Sha256};

/// Separator between hashed sections so that moving bytes across fields
/// changes the digest.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Rendering inputs of a dashboard
#[derive(Debug, Clone, Copy)]
pub struct DashboardContent<'a> {
    pub json: &'a str,
    pub datasources: &'a [DatasourceInput],
    pub plugins: &'a [GrafanaPlugin],
}

/// Lowercase hex SHA-256 of the dashboard content
pub fn fingerprint(content: &DashboardContent<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.json.as_bytes());

    hasher.update([FIELD_SEPARATOR]);
    for ds in content.datasources {
        hasher.update(ds.input_name.as_bytes());
        hasher.update(b"=");
        hasher.update(ds.datasource_name.as_bytes());
        hasher.update(b"\n");
    }

    hasher.update([FIELD_SEPARATOR]);
    for plugin in content.plugins {
        hasher.update(plugin.name.as_bytes());
        hasher.update(b"@");
        hasher.update(plugin.version.as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content<'a>(json: &'a str, datasources: &'a [DatasourceInput], plugins: &'a [GrafanaPlugin]) -> DashboardContent<'a> {
        DashboardContent { json, datasources, plugins }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(&content(r#"{"title":"x"}"#, &[], &[]));
        let b = fingerprint(&content(r#"{"title":"x"}"#, &[], &[]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_changes_with_json() {
        let a = fingerprint(&content(r#"{"title":"x"}"#, &[], &[]));
        let b = fingerprint(&content(r#"{"title":"y"}"#, &[], &[]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_covers_sub_objects() {
        let json = r#"{"title":"x"}"#;
        let ds = [DatasourceInput {
            input_name: "DS_PROM".to_string(),
            datasource_name: "Prometheus".to_string(),
        }];
        let plugins = [GrafanaPlugin {
            name: "grafana-piechart-panel".to_string(),
            version: "1.3.9".to_string(),
        }];

        let bare = fingerprint(&content(json, &[], &[]));
        let with_ds = fingerprint(&content(json, &ds, &[]));
        let with_plugin = fingerprint(&content(json, &[], &plugins));
        assert_ne!(bare, with_ds);
        assert_ne!(bare, with_plugin);
        assert_ne!(with_ds, with_plugin);
    }

    #[test]
    fn test_malformed_json_is_hashed() {
        let hash = fingerprint(&content("{not json", &[], &[]));
        assert_eq!(hash.len(), 64);
    }
}
