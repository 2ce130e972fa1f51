//! Controller state snapshots.
//!
//! Readiness of Grafana, credentials and label selectors are published as an
//! immutable [`ControllerState`] through a [`StateStore`]. Each reconciliation
//! takes the latest snapshot when it starts; nothing mutates a snapshot in
//! place while a pass is reading it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Everything a reconciliation needs to know about the outside world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    /// Grafana is up and answering API requests
    pub grafana_ready: bool,
    pub grafana_url: String,
    pub admin_username: String,
    pub admin_password: String,
    /// Timeout applied to every Grafana call and namespace lookup
    pub client_timeout: Duration,
    /// `None` until selectors are configured; nothing matches until then
    pub dashboard_selectors: Option<Vec<LabelSelector>>,
    /// `None` means namespaces are not filtered
    pub namespace_selector: Option<LabelSelector>,
}

impl ControllerState {
    /// Copy of this snapshot with a different readiness flag
    pub fn with_ready(&self, ready: bool) -> Self {
        Self {
            grafana_ready: ready,
            ..self.clone()
        }
    }
}

/// Atomically replaceable holder of the current [`ControllerState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<Arc<ControllerState>>>,
}

impl StateStore {
    pub fn new(initial: ControllerState) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<ControllerState> {
        self.tx.borrow().clone()
    }

    /// Publish a readiness change. Returns `true` when the flag flipped.
    pub fn set_ready(&self, ready: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if current.grafana_ready == ready {
                false
            } else {
                *current = Arc::new(current.with_ready(ready));
                true
            }
        })
    }
}
