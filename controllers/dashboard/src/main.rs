//! Grafana Dashboard Controller
//!
//! Keeps the dashboards of a Grafana instance in line with the
//! `GrafanaDashboard` resources of the cluster. Dashboards are grouped into
//! one Grafana folder per namespace and only written when their content
//! changed.

mod backoff;
mod cluster;
mod config;
mod controller;
mod error;
mod hasher;
mod pipeline;
mod reconciler;
mod registry;
mod selector;
mod state;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Grafana Dashboard Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Grafana URL: {}", config.initial_state.grafana_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!(
        "  Dashboard selectors: {}",
        config
            .initial_state
            .dashboard_selectors
            .as_ref()
            .map_or_else(|| "none (nothing is managed)".to_string(), |s| format!("{} configured", s.len()))
    );
    info!(
        "  Namespace selector: {}",
        if config.initial_state.namespace_selector.is_some() { "configured" } else { "none" }
    );
    info!("  Resync period: {:?}", config.resync_period);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
