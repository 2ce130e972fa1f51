//! Main controller implementation.
//!
//! Wires the Kubernetes client, the Grafana client factory, the registry and
//! the reconciler together, then runs the request producers and the single
//! reconciliation worker as background tasks.

use crate::cluster::{Cluster, KubeCluster};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::pipeline::DashboardPipeline;
use crate::reconciler::{ClientFactory, HttpClientFactory, Reconciler};
use crate::registry::Registry;
use crate::state::StateStore;
use crate::watcher::{run_worker, ReadinessProbe, Watcher};
use crds::GrafanaDashboard;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long an in-flight pass may take to wind down on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Main controller for Grafana dashboard management.
pub struct Controller {
    dashboard_watcher: JoinHandle<Result<(), ControllerError>>,
    resync_timer: JoinHandle<Result<(), ControllerError>>,
    readiness_monitor: JoinHandle<Result<(), ControllerError>>,
    worker: JoinHandle<Result<(), ControllerError>>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Grafana Dashboard Controller");

        let kube_client = Client::try_default().await?;

        let dashboard_api: Api<GrafanaDashboard> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let cluster: Arc<dyn Cluster> = Arc::new(KubeCluster::new(kube_client, config.namespace.clone()));
        let clients: Arc<dyn ClientFactory> = Arc::new(HttpClientFactory);
        let state = StateStore::new(config.initial_state);

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cluster),
            Arc::new(DashboardPipeline::new(Arc::clone(&cluster))),
            Arc::clone(&clients),
            Arc::new(Registry::new()),
            config.requeue_delay,
        ));

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let watcher_instance = Arc::new(Watcher::new(
            dashboard_api,
            ReadinessProbe::new(state.clone(), clients),
            requests_tx.clone(),
            config.resync_period,
            config.readiness_poll,
        ));

        let dashboard_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_dashboards().await })
        };

        let resync_timer = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.resync_periodically().await })
        };

        let readiness_monitor = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.monitor_readiness().await })
        };

        let worker = tokio::spawn(run_worker(reconciler, state, requests_rx, requests_tx, shutdown_rx));

        Ok(Self {
            dashboard_watcher,
            resync_timer,
            readiness_monitor,
            worker,
            shutdown: shutdown_tx,
        })
    }

    /// Runs the controller until ctrl-c or until a background task exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Grafana Dashboard Controller running");

        let result = tokio::select! {
            result = &mut self.dashboard_watcher => flatten("GrafanaDashboard watcher", result),
            result = &mut self.resync_timer => flatten("Resync timer", result),
            result = &mut self.readiness_monitor => flatten("Readiness monitor", result),
            result = &mut self.worker => flatten("Worker", result),
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => warn!("Cannot listen for shutdown signal: {}", e),
                }
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!("Controller stopping: {}", e);
        }

        // A send error means the worker is already gone
        let _ = self.shutdown.send(true);
        self.dashboard_watcher.abort();
        self.resync_timer.abort();
        self.readiness_monitor.abort();
        if !self.worker.is_finished() && tokio::time::timeout(SHUTDOWN_GRACE, &mut self.worker).await.is_err() {
            warn!("Worker did not stop within {:?}", SHUTDOWN_GRACE);
            self.worker.abort();
        }

        info!("Grafana Dashboard Controller stopped");
        result
    }
}

fn flatten(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result.map_err(|e| ControllerError::Watch(format!("{} panicked: {}", task, e)))??;
    Err(ControllerError::Watch(format!("{} exited unexpectedly", task)))
}
