//! Reconciliation of `GrafanaDashboard` resources against Grafana.
//!
//! A reconciliation always works on a whole namespace: it lists the
//! dashboards declared there, applies the ones whose content changed since
//! the last successful apply, and deletes from Grafana the ones that were
//! applied before but are no longer declared. The [`Registry`] records what
//! has been applied, so repeated passes over unchanged input make no remote
//! writes.

pub mod plan;

use crate::cluster::Cluster;
use crate::error::{with_timeout, ControllerError};
use crate::pipeline::DashboardRenderer;
use crate::registry::{Registry, RegistryEntry};
use crate::selector;
use crate::state::ControllerState;
use crds::{DashboardPhase, GrafanaDashboard, GrafanaDashboardStatus};
use grafana_client::{GrafanaClient, GrafanaClientTrait, GrafanaError};
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a reconciliation was requested
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReconcileRequest {
    /// Every namespace holding dashboards (periodic resync, Grafana became ready)
    ResyncAll,
    /// One namespace, all of its dashboards
    FullResync { namespace: String },
    /// A single dashboard was created, updated or deleted
    ResourceChanged { namespace: String, name: String },
}

impl ReconcileRequest {
    /// Request to retry with after a failure. A failed single-resource
    /// request retries its whole namespace, which the pass covers anyway.
    pub fn retry(&self) -> ReconcileRequest {
        match self {
            ReconcileRequest::ResourceChanged { namespace, .. } => ReconcileRequest::FullResync {
                namespace: namespace.clone(),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileRequest::ResyncAll => write!(f, "resync of all namespaces"),
            ReconcileRequest::FullResync { namespace } => write!(f, "resync of namespace {}", namespace),
            ReconcileRequest::ResourceChanged { namespace, name } => write!(f, "change of {}/{}", namespace, name),
        }
    }
}

/// What the dispatcher should do after a reconciliation
#[derive(Debug)]
pub enum RequeueDirective {
    Done,
    RequeueAfter(Duration),
    RequeueWithError(ControllerError),
}

/// Builds Grafana clients from the current controller state
pub trait ClientFactory: Send + Sync {
    fn client(&self, state: &ControllerState) -> Result<Arc<dyn GrafanaClientTrait>, ControllerError>;
}

/// [`ClientFactory`] producing HTTP clients with basic auth
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn client(&self, state: &ControllerState) -> Result<Arc<dyn GrafanaClientTrait>, ControllerError> {
        let client = GrafanaClient::new(
            state.grafana_url.clone(),
            state.admin_username.clone(),
            state.admin_password.clone(),
            state.client_timeout,
        )?;
        Ok(Arc::new(client))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No dashboard selector matches the resource labels
    SelectorMismatch,
    /// The namespace labels do not satisfy the namespace selector
    NamespaceMismatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SelectorMismatch => write!(f, "no selector matches"),
            SkipReason::NamespaceMismatch => write!(f, "namespace selector does not match"),
        }
    }
}

#[derive(Debug)]
pub enum OutcomeKind {
    Applied { uid: String },
    Unchanged { uid: String },
    Skipped(SkipReason),
    Deleted { uid: String },
    Failed(ControllerError),
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Applied { uid } => write!(f, "applied as {}", uid),
            OutcomeKind::Unchanged { uid } => write!(f, "unchanged as {}", uid),
            OutcomeKind::Skipped(reason) => write!(f, "skipped, {}", reason),
            OutcomeKind::Deleted { uid } => write!(f, "deleted {}", uid),
            OutcomeKind::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Result of reconciling one dashboard
#[derive(Debug)]
pub struct DashboardOutcome {
    pub name: String,
    pub kind: OutcomeKind,
}

/// Outcomes of one namespace pass
#[derive(Debug, Default)]
pub struct PassReport {
    pub namespace: String,
    pub outcomes: Vec<DashboardOutcome>,
}

impl PassReport {
    #[cfg(test)]
    pub fn outcome(&self, name: &str) -> Option<&OutcomeKind> {
        self.outcomes.iter().find(|o| o.name == name).map(|o| &o.kind)
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.kind, OutcomeKind::Failed(_)))
            .count()
    }

    fn count(&self, pred: impl Fn(&OutcomeKind) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.kind)).count()
    }
}

fn pass_directive(result: Result<PassReport, ControllerError>) -> RequeueDirective {
    match result {
        Ok(report) => {
            for outcome in &report.outcomes {
                debug!("{}/{}: {}", report.namespace, outcome.name, outcome.kind);
            }
            RequeueDirective::Done
        }
        Err(e) => RequeueDirective::RequeueWithError(e),
    }
}

/// Converges Grafana towards the declared dashboards
pub struct Reconciler {
    cluster: Arc<dyn Cluster>,
    renderer: Arc<dyn DashboardRenderer>,
    clients: Arc<dyn ClientFactory>,
    registry: Arc<Registry>,
    requeue_delay: Duration,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        renderer: Arc<dyn DashboardRenderer>,
        clients: Arc<dyn ClientFactory>,
        registry: Arc<Registry>,
        requeue_delay: Duration,
    ) -> Self {
        Self {
            cluster,
            renderer,
            clients,
            registry,
            requeue_delay,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one request against the given state snapshot.
    pub async fn reconcile(&self, request: &ReconcileRequest, state: &ControllerState) -> RequeueDirective {
        if !state.grafana_ready {
            debug!("Grafana not ready, postponing {}", request);
            return RequeueDirective::RequeueAfter(self.requeue_delay);
        }

        let client = match self.clients.client(state) {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot build Grafana client, postponing {}: {}", request, e);
                return RequeueDirective::RequeueAfter(self.requeue_delay);
            }
        };

        match request {
            ReconcileRequest::ResyncAll => self.resync_all(client.as_ref(), state).await,
            ReconcileRequest::FullResync { namespace } => {
                pass_directive(self.reconcile_namespace(namespace, client.as_ref(), state).await)
            }
            ReconcileRequest::ResourceChanged { namespace, name } => {
                self.resource_changed(namespace, name, client.as_ref(), state).await
            }
        }
    }

    async fn resync_all(&self, client: &dyn GrafanaClientTrait, state: &ControllerState) -> RequeueDirective {
        let listed = with_timeout(
            state.client_timeout,
            "dashboard namespace listing",
            self.cluster.dashboard_namespaces(),
        )
        .await;
        let mut namespaces: BTreeSet<String> = match listed {
            Ok(namespaces) => namespaces,
            Err(e) => return RequeueDirective::RequeueWithError(e),
        };
        // Namespaces that lost their last dashboard still need their deletions
        namespaces.extend(self.registry.namespaces());

        let mut last_error = None;
        for namespace in &namespaces {
            if let RequeueDirective::RequeueWithError(e) =
                pass_directive(self.reconcile_namespace(namespace, client, state).await)
            {
                error!("Pass over namespace {} failed: {}", namespace, e);
                last_error = Some(e);
            }
        }
        debug!("{} plugins required by known dashboards", self.registry.plugins().len());

        match last_error {
            Some(e) => RequeueDirective::RequeueWithError(e),
            None => RequeueDirective::Done,
        }
    }

    async fn resource_changed(
        &self,
        namespace: &str,
        name: &str,
        client: &dyn GrafanaClientTrait,
        state: &ControllerState,
    ) -> RequeueDirective {
        let Some(selectors) = state.dashboard_selectors.as_deref() else {
            debug!("Dashboard selectors not initialised, postponing {}/{}", namespace, name);
            return RequeueDirective::RequeueAfter(self.requeue_delay);
        };

        let fetched = with_timeout(
            state.client_timeout,
            &format!("dashboard {}/{} lookup", namespace, name),
            self.cluster.get_dashboard(namespace, name),
        )
        .await;
        match fetched {
            Err(e) => RequeueDirective::RequeueWithError(e),
            Ok(Some(dashboard)) if !selector::matches(dashboard.labels(), Some(selectors)) => {
                debug!("Dashboard {}/{} does not match any selector", namespace, name);
                RequeueDirective::Done
            }
            Ok(None) if self.registry.hash_of(namespace, name).is_none() => {
                debug!("Dashboard {}/{} is gone and was never applied", namespace, name);
                RequeueDirective::Done
            }
            // Present and in scope, or gone: both are handled by a namespace pass
            Ok(_) => pass_directive(self.reconcile_namespace(namespace, client, state).await),
        }
    }

    /// Bring one namespace in line with its declared dashboards.
    ///
    /// Fails only when the namespace cannot be listed; individual dashboard
    /// failures are reported in the returned [`PassReport`] and retried on
    /// the next pass.
    pub async fn reconcile_namespace(
        &self,
        namespace: &str,
        client: &dyn GrafanaClientTrait,
        state: &ControllerState,
    ) -> Result<PassReport, ControllerError> {
        let pass = self.registry.lock_namespace(namespace).await;
        if !self.registry.is_synced(namespace) {
            info!("First pass over namespace {}", namespace);
        } else if let Some(at) = self.registry.synced_at(namespace) {
            debug!("Namespace {} last synced at {}", namespace, at);
        }

        let desired = with_timeout(
            state.client_timeout,
            &format!("dashboard listing in {}", namespace),
            self.cluster.list_dashboards(namespace),
        )
        .await?;
        let known = self.registry.dashboards_in(namespace);
        let to_delete = plan::deletions(&known, &desired);

        debug!(
            "Namespace {}: {} declared, {} known, {} to delete",
            namespace,
            desired.len(),
            known.len(),
            to_delete.len()
        );

        let mut report = PassReport {
            namespace: namespace.to_string(),
            outcomes: Vec::with_capacity(desired.len() + to_delete.len()),
        };

        for dashboard in &desired {
            let name = dashboard.name_any();
            let known_entry = plan::known_entry(&known, namespace, &name);
            let (kind, hash) = self.apply(dashboard, known_entry, client, state).await;
            self.report_status(dashboard, &kind, hash, state.client_timeout).await;
            report.outcomes.push(DashboardOutcome { name, kind });
        }

        for entry in to_delete {
            let kind = self.delete(&entry, client, state.client_timeout).await;
            report.outcomes.push(DashboardOutcome { name: entry.name, kind });
        }

        self.registry.mark_synced(namespace);
        drop(pass);
        self.registry.release_namespace(namespace);
        info!(
            "Namespace {} reconciled: {} applied, {} deleted, {} failed",
            namespace,
            report.count(|k| matches!(k, OutcomeKind::Applied { .. })),
            report.count(|k| matches!(k, OutcomeKind::Deleted { .. })),
            report.failed()
        );
        Ok(report)
    }

    /// Apply one declared dashboard. Returns the outcome and, when rendering
    /// succeeded, the content hash.
    async fn apply(
        &self,
        dashboard: &GrafanaDashboard,
        known: Option<&RegistryEntry>,
        client: &dyn GrafanaClientTrait,
        state: &ControllerState,
    ) -> (OutcomeKind, Option<String>) {
        let namespace = dashboard.namespace().unwrap_or_default();
        let name = dashboard.name_any();

        if !selector::matches(dashboard.labels(), state.dashboard_selectors.as_deref()) {
            debug!("Dashboard {}/{} does not match any selector", namespace, name);
            return (OutcomeKind::Skipped(SkipReason::SelectorMismatch), None);
        }

        let rendered = with_timeout(
            state.client_timeout,
            &format!("rendering {}/{}", namespace, name),
            self.renderer.render(dashboard, known.map(|entry| entry.hash.as_str())),
        )
        .await;
        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(e) => return (OutcomeKind::Failed(e), None),
        };

        let Some(payload) = rendered.payload else {
            self.registry.set_plugins(&namespace, &name, &dashboard.spec.plugins);
            let uid = known.map(|entry| entry.uid.clone()).unwrap_or_default();
            return (OutcomeKind::Unchanged { uid }, Some(rendered.hash));
        };

        if let Some(namespace_selector) = &state.namespace_selector {
            match selector::matches_namespace(
                self.cluster.as_ref(),
                &namespace,
                namespace_selector,
                state.client_timeout,
            )
            .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Dashboard {}/{} skipped, namespace labels do not match", namespace, name);
                    return (OutcomeKind::Skipped(SkipReason::NamespaceMismatch), Some(rendered.hash));
                }
                Err(e) => return (OutcomeKind::Failed(e), Some(rendered.hash)),
            }
        }

        let folder = match with_timeout(
            state.client_timeout,
            &format!("folder for {}", namespace),
            client.get_or_create_namespace_folder(&namespace),
        )
        .await
        {
            Ok(folder) => folder,
            Err(e) => return (OutcomeKind::Failed(e), Some(rendered.hash)),
        };
        let folder_id = folder.folder_id();

        let submitted = with_timeout(
            state.client_timeout,
            &format!("submitting {}/{}", namespace, name),
            client.create_or_update_dashboard(&payload, folder_id),
        )
        .await;
        let response = match submitted {
            Ok(response) => response,
            Err(e) => return (OutcomeKind::Failed(e), Some(rendered.hash)),
        };
        info!("Dashboard {}/{} submitted as {}", namespace, name, response.uid);

        // A changed uid leaves the previous revision behind under the old one.
        // Until it is gone the old entry stays, so the next pass retries.
        if let Some(previous) = known.filter(|entry| entry.uid != response.uid) {
            info!(
                "Dashboard {}/{} moved from uid {} to {}",
                namespace, name, previous.uid, response.uid
            );
            if let Err(e) = self.remove_remote(previous, client, state.client_timeout).await {
                return (OutcomeKind::Failed(e), Some(rendered.hash));
            }
        }

        self.registry.put(RegistryEntry {
            namespace: namespace.clone(),
            name: name.clone(),
            hash: rendered.hash.clone(),
            uid: response.uid.clone(),
            folder_id,
        });
        self.registry.set_plugins(&namespace, &name, &dashboard.spec.plugins);
        (OutcomeKind::Applied { uid: response.uid }, Some(rendered.hash))
    }

    async fn delete(&self, entry: &RegistryEntry, client: &dyn GrafanaClientTrait, timeout: Duration) -> OutcomeKind {
        if let Err(e) = self.remove_remote(entry, client, timeout).await {
            return OutcomeKind::Failed(e);
        }
        self.registry.remove(&entry.namespace, &entry.name);
        OutcomeKind::Deleted { uid: entry.uid.clone() }
    }

    /// Delete the Grafana dashboard behind `entry`. A dashboard that is
    /// already gone counts as deleted.
    async fn remove_remote(
        &self,
        entry: &RegistryEntry,
        client: &dyn GrafanaClientTrait,
        timeout: Duration,
    ) -> Result<(), ControllerError> {
        let result = with_timeout(
            timeout,
            &format!("deleting {}", entry.uid),
            client.delete_dashboard_by_uid(&entry.uid),
        )
        .await;
        match result {
            Ok(response) => {
                info!(
                    "Dashboard {}/{} deleted: {}",
                    entry.namespace,
                    entry.name,
                    response.message.as_deref().unwrap_or("no message")
                );
            }
            Err(ControllerError::Grafana(GrafanaError::NotFound(_))) => {
                info!("Dashboard {}/{} already absent from Grafana", entry.namespace, entry.name);
            }
            Err(e) => {
                error!("Failed to delete dashboard {}/{} ({}): {}", entry.namespace, entry.name, entry.uid, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Surface the outcome on the resource status, patching only on change.
    async fn report_status(
        &self,
        dashboard: &GrafanaDashboard,
        kind: &OutcomeKind,
        hash: Option<String>,
        timeout: Duration,
    ) {
        let namespace = dashboard.namespace().unwrap_or_default();
        let name = dashboard.name_any();
        let current = dashboard.status.clone().unwrap_or_default();

        let desired = match kind {
            OutcomeKind::Applied { uid } | OutcomeKind::Unchanged { uid } => GrafanaDashboardStatus {
                phase: DashboardPhase::Reconciled,
                message: None,
                uid: Some(uid.clone()),
                hash,
            },
            OutcomeKind::Failed(e) if e.is_conflict() => {
                debug!("Ignoring conflict for dashboard {}/{}: {}", namespace, name, e);
                return;
            }
            OutcomeKind::Failed(e) => {
                if e.is_transient() {
                    warn!("Dashboard {}/{} failed, retrying on the next pass: {}", namespace, name, e);
                } else {
                    error!("Dashboard {}/{} failed: {}", namespace, name, e);
                }
                GrafanaDashboardStatus {
                    phase: DashboardPhase::Failed,
                    message: Some(e.to_string()),
                    ..current.clone()
                }
            }
            OutcomeKind::Skipped(_) | OutcomeKind::Deleted { .. } => return,
        };

        if dashboard.status.as_ref() == Some(&desired) {
            return;
        }

        let patched = with_timeout(
            timeout,
            &format!("status of {}/{}", namespace, name),
            self.cluster.patch_status(&namespace, &name, &desired),
        )
        .await;
        if let Err(e) = patched {
            warn!("Failed to update status of dashboard {}/{}: {}", namespace, name, e);
        }
    }
}
