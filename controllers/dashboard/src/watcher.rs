//! Sources of reconciliation requests and the worker that drains them.
//!
//! Three producers feed a single channel: the `GrafanaDashboard` watch, the
//! periodic resync timer and the Grafana readiness monitor. One worker pulls
//! requests from a coalescing [`RequestQueue`] and runs them one at a time.

use crate::backoff::FibonacciBackoff;
use crate::error::{with_timeout, ControllerError};
use crate::reconciler::{ClientFactory, ReconcileRequest, Reconciler, RequeueDirective};
use crate::state::StateStore;
use crds::GrafanaDashboard;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Pending requests with redundant ones folded away.
///
/// `ResyncAll` subsumes every other request, `FullResync(ns)` subsumes the
/// `ResourceChanged` requests of that namespace, and identical requests
/// collapse into one.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<ReconcileRequest>,
}

impl RequestQueue {
    /// Queue a request. Returns `false` when it was already covered.
    pub fn push(&mut self, request: ReconcileRequest) -> bool {
        if self.pending.contains(&ReconcileRequest::ResyncAll) || self.pending.contains(&request) {
            return false;
        }

        match &request {
            ReconcileRequest::ResyncAll => self.pending.clear(),
            ReconcileRequest::FullResync { namespace } => self.pending.retain(
                |pending| !matches!(pending, ReconcileRequest::ResourceChanged { namespace: ns, .. } if ns == namespace),
            ),
            ReconcileRequest::ResourceChanged { namespace, .. } => {
                let covered = self
                    .pending
                    .iter()
                    .any(|pending| matches!(pending, ReconcileRequest::FullResync { namespace: ns } if ns == namespace));
                if covered {
                    return false;
                }
            }
        }

        self.pending.push_back(request);
        true
    }

    pub fn pop(&mut self) -> Option<ReconcileRequest> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Remembers the last seen generation of each dashboard so that
/// status-only updates do not trigger reconciliation.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    seen: HashMap<(String, String), Option<i64>>,
}

impl GenerationTracker {
    /// Record an applied object. Returns `true` when its spec changed.
    pub fn observe(&mut self, dashboard: &GrafanaDashboard) -> bool {
        let key = (dashboard.namespace().unwrap_or_default(), dashboard.name_any());
        let generation = dashboard.metadata.generation;
        match self.seen.insert(key, generation) {
            Some(previous) => previous != generation || generation.is_none(),
            None => true,
        }
    }

    pub fn forget(&mut self, dashboard: &GrafanaDashboard) {
        self.seen
            .remove(&(dashboard.namespace().unwrap_or_default(), dashboard.name_any()));
    }
}

/// Polls Grafana's health endpoint and publishes readiness changes
pub struct ReadinessProbe {
    state: StateStore,
    clients: Arc<dyn ClientFactory>,
}

impl ReadinessProbe {
    pub fn new(state: StateStore, clients: Arc<dyn ClientFactory>) -> Self {
        Self { state, clients }
    }

    /// Probe once. Returns `true` when Grafana just became ready.
    pub async fn probe(&self) -> bool {
        let snapshot = self.state.snapshot();
        let ready = match self.clients.client(&snapshot) {
            Ok(client) => match with_timeout(snapshot.client_timeout, "health check", client.health()).await {
                Ok(health) => health.is_ok(),
                Err(e) => {
                    debug!("Grafana health check failed: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("Cannot build Grafana client: {}", e);
                false
            }
        };

        if !self.state.set_ready(ready) {
            return false;
        }
        if ready {
            info!("Grafana at {} is ready", snapshot.grafana_url);
        } else {
            warn!("Grafana at {} is no longer ready", snapshot.grafana_url);
        }
        ready
    }
}

/// Produces reconciliation requests.
pub struct Watcher {
    dashboard_api: Api<GrafanaDashboard>,
    probe: ReadinessProbe,
    requests: mpsc::UnboundedSender<ReconcileRequest>,
    resync_period: Duration,
    readiness_poll: Duration,
}

impl Watcher {
    pub fn new(
        dashboard_api: Api<GrafanaDashboard>,
        probe: ReadinessProbe,
        requests: mpsc::UnboundedSender<ReconcileRequest>,
        resync_period: Duration,
        readiness_poll: Duration,
    ) -> Self {
        Self {
            dashboard_api,
            probe,
            requests,
            resync_period,
            readiness_poll,
        }
    }

    fn enqueue(&self, request: ReconcileRequest) -> Result<(), ControllerError> {
        self.requests
            .send(request)
            .map_err(|_| ControllerError::Watch("request channel closed".to_string()))
    }

    /// Starts watching GrafanaDashboard resources.
    pub async fn watch_dashboards(&self) -> Result<(), ControllerError> {
        info!("Starting GrafanaDashboard watcher");
        let mut generations = GenerationTracker::default();
        let mut events = watcher::watcher(self.dashboard_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Apply(dashboard)) | Ok(Event::InitApply(dashboard)) => {
                    if generations.observe(&dashboard) {
                        self.enqueue(changed(&dashboard))?;
                    }
                }
                Ok(Event::Delete(dashboard)) => {
                    generations.forget(&dashboard);
                    self.enqueue(changed(&dashboard))?;
                }
                Ok(Event::Init) | Ok(Event::InitDone) => {}
                Err(e) => warn!("GrafanaDashboard watch error: {}", e),
            }
        }

        Err(ControllerError::Watch("GrafanaDashboard watch stream ended".to_string()))
    }

    /// Requests a resync of every namespace once per period.
    pub async fn resync_periodically(&self) -> Result<(), ControllerError> {
        let mut interval = tokio::time::interval(self.resync_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            debug!("Periodic resync");
            self.enqueue(ReconcileRequest::ResyncAll)?;
        }
    }

    /// Polls Grafana readiness; a resync follows every not-ready to ready transition.
    pub async fn monitor_readiness(&self) -> Result<(), ControllerError> {
        let mut interval = tokio::time::interval(self.readiness_poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.probe.probe().await {
                self.enqueue(ReconcileRequest::ResyncAll)?;
            }
        }
    }
}

fn changed(dashboard: &GrafanaDashboard) -> ReconcileRequest {
    ReconcileRequest::ResourceChanged {
        namespace: dashboard.namespace().unwrap_or_default(),
        name: dashboard.name_any(),
    }
}

fn requeue(requests: &mpsc::UnboundedSender<ReconcileRequest>, request: ReconcileRequest, delay: Duration) {
    let requests = requests.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // The worker is gone after shutdown; nothing left to do then.
        let _ = requests.send(request);
    });
}

/// Drain requests one at a time until shutdown is signalled or every
/// sender is gone.
pub async fn run_worker(
    reconciler: Arc<Reconciler>,
    state: StateStore,
    mut incoming: mpsc::UnboundedReceiver<ReconcileRequest>,
    requeues: mpsc::UnboundedSender<ReconcileRequest>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ControllerError> {
    info!("Reconciliation worker started");
    let mut queue = RequestQueue::default();
    let mut backoffs: HashMap<ReconcileRequest, FibonacciBackoff> = HashMap::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        while let Ok(request) = incoming.try_recv() {
            queue.push(request);
        }

        let Some(request) = queue.pop() else {
            let received = tokio::select! {
                received = incoming.recv() => received,
                _ = shutdown.changed() => None,
            };
            match received {
                Some(request) => {
                    queue.push(request);
                    continue;
                }
                None => break,
            }
        };

        // Latest snapshot for every request, never a cached one
        let snapshot = state.snapshot();
        debug!("Processing {} ({} pending)", request, queue.len());
        let directive = tokio::select! {
            directive = reconciler.reconcile(&request, &snapshot) => directive,
            _ = shutdown.changed() => {
                info!("Shutdown requested, abandoning {}", request);
                break;
            }
        };

        let retry = request.retry();
        match directive {
            RequeueDirective::Done => {
                if let Some(backoff) = backoffs.get_mut(&retry) {
                    backoff.reset();
                }
            }
            RequeueDirective::RequeueAfter(delay) => {
                debug!("Requeueing {} in {:?}", request, delay);
                requeue(&requeues, request, delay);
            }
            RequeueDirective::RequeueWithError(e) => {
                let delay = backoffs.entry(retry.clone()).or_default().next_backoff();
                error!("Reconciliation of {} failed, retrying {} in {:?}: {}", request, retry, delay, e);
                requeue(&requeues, retry, delay);
            }
        }
    }

    info!("Reconciliation worker stopped");
    Ok(())
}
