//! Grafana HTTP API Client
//!
//! A small client for the parts of the Grafana API the dashboard controller
//! needs: health checks, namespace folders, and dashboard create/update/delete.
//!
//! # Example
//!
//! ```no_run
//! use grafana_client::{GrafanaClient, GrafanaClientTrait};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GrafanaClient::new(
//!     "http://grafana-service:3000".to_string(),
//!     "admin".to_string(),
//!     "secret".to_string(),
//!     Duration::from_secs(5),
//! )?;
//!
//! let folder = client.get_or_create_namespace_folder("monitoring").await?;
//! let dashboard = serde_json::json!({ "uid": "node-exporter", "title": "Nodes", "panels": [] });
//! let created = client.create_or_update_dashboard(&dashboard, folder.folder_id()).await?;
//! client.delete_dashboard_by_uid(&created.uid).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod grafana_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::GrafanaClient;
pub use common::HttpClient;
pub use error::GrafanaError;
pub use models::*;
pub use grafana_trait::GrafanaClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockCall, MockFailure, MockGrafanaClient};
