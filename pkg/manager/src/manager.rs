use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use pkg_constants::dispatch::RECONCILE_TIMEOUT_SECS;
use pkg_metrics::WORKQUEUE_DEPTH;
use pkg_state::Store;
use pkg_types::meta::{KindSpec, Record};

use crate::queue::WorkQueue;
use crate::reconcile::{ReconcileAction, ReconcileRequest, Reconciler};
use crate::scheme::SchemeRegistry;

/// Per-controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Concurrent reconcile workers for this kind. Per-key
    /// serialization still holds across workers.
    pub workers: usize,
    /// Periodic full re-list, if any.
    pub resync: Option<Duration>,
    /// Wall-clock budget per reconcile invocation.
    pub reconcile_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            resync: None,
            reconcile_timeout: Duration::from_secs(RECONCILE_TIMEOUT_SECS),
        }
    }
}

struct ControllerEntry {
    kind: KindSpec,
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue>,
    options: ControllerOptions,
}

/// Wires watches to per-kind work queues and worker pools. With leader
/// election enabled, reconcilers only start once this instance holds
/// the lease; losing it afterwards is fatal so a restart re-contends.
pub struct ControllerManager<S: Store> {
    store: Arc<S>,
    scheme: SchemeRegistry,
    controllers: Vec<ControllerEntry>,
    leader_rx: Option<watch::Receiver<bool>>,
}

impl<S: Store> ControllerManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            scheme: SchemeRegistry::new(),
            controllers: Vec::new(),
            leader_rx: None,
        }
    }

    pub fn with_leader_election(mut self, rx: watch::Receiver<bool>) -> Self {
        self.leader_rx = Some(rx);
        self
    }

    pub fn scheme(&self) -> &SchemeRegistry {
        &self.scheme
    }

    /// Register a reconciler for a kind. The kind is added to the
    /// scheme so watch payloads can be decoded.
    pub fn register<R: Record>(
        &mut self,
        reconciler: Arc<dyn Reconciler>,
        options: ControllerOptions,
    ) {
        self.scheme.register::<R>();
        info!(
            "Registered {} controller (workers={})",
            R::KIND,
            options.workers
        );
        self.controllers.push(ControllerEntry {
            kind: R::kind_spec(),
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            options,
        });
    }

    /// Run until `shutdown` flips to true (clean) or leadership is
    /// lost (error, so the process restarts and re-contends).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if self.controllers.is_empty() {
            return Err(anyhow::anyhow!("no controllers registered"));
        }

        // Leader gate: reconcilers only run on the lease holder.
        if let Some(mut leader_rx) = self.leader_rx.clone() {
            info!("Waiting for leader election before starting controllers");
            loop {
                if *leader_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = leader_rx.changed() => {
                        if changed.is_err() {
                            return Err(anyhow::anyhow!("leader election channel closed"));
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return Ok(());
                        }
                    }
                }
            }
            info!("Leader election won, starting controllers");
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let scheme = Arc::new(self.scheme.clone());

        for entry in &self.controllers {
            // Subscribe before the initial list so no event can fall
            // between them.
            handles.push(self.spawn_watcher(entry, shutdown.clone(), scheme.clone()));
            self.enqueue_all(entry).await?;
            if let Some(resync) = entry.options.resync {
                handles.push(self.spawn_resync(entry, resync, shutdown.clone(), scheme.clone()));
            }
            for worker in 0..entry.options.workers {
                handles.push(self.spawn_worker(entry, worker));
            }
        }

        handles.push(self.spawn_depth_gauge(shutdown.clone()));

        // Block until shutdown or leadership loss, then drain.
        let mut lost_leadership = false;
        let mut leader_rx = self.leader_rx.clone();
        loop {
            match &mut leader_rx {
                Some(rx) => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        changed = rx.changed() => {
                            if changed.is_err() || !*rx.borrow() {
                                lost_leadership = true;
                                break;
                            }
                        }
                    }
                }
                None => {
                    let closed = shutdown.changed().await.is_err();
                    if closed || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Controller manager stopping (lost_leadership={})", lost_leadership);
        for entry in &self.controllers {
            entry.queue.shutdown();
        }
        for handle in handles {
            let _ = handle.await;
        }

        if lost_leadership {
            error!("Leadership lost while controllers were running");
            return Err(anyhow::anyhow!("leadership lost"));
        }
        Ok(())
    }

    async fn enqueue_all(&self, entry: &ControllerEntry) -> anyhow::Result<()> {
        let values = self.store.list_value(entry.kind, None).await?;
        let count = values.len();
        for value in values {
            enqueue_value(&self.scheme, entry.kind, &entry.queue, &value);
        }
        info!("Enqueued {} existing {} records", count, entry.kind.kind);
        Ok(())
    }

    fn spawn_watcher(
        &self,
        entry: &ControllerEntry,
        mut shutdown: watch::Receiver<bool>,
        scheme: Arc<SchemeRegistry>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let kind = entry.kind;
        let queue = entry.queue.clone();
        let mut rx = store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    event = rx.recv() => match event {
                        Ok(event) => {
                            if event.kind != kind.kind {
                                continue;
                            }
                            enqueue_value(&scheme, kind, &queue, &event.record);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Fell behind the event stream: re-list so no
                            // change is silently dropped.
                            warn!("{} watch lagged ({} events), re-listing", kind.kind, missed);
                            match store.list_value(kind, None).await {
                                Ok(values) => {
                                    for value in values {
                                        enqueue_value(&scheme, kind, &queue, &value);
                                    }
                                }
                                Err(e) => warn!("Re-list after watch lag failed: {}", e),
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        })
    }

    fn spawn_resync(
        &self,
        entry: &ControllerEntry,
        resync: Duration,
        mut shutdown: watch::Receiver<bool>,
        scheme: Arc<SchemeRegistry>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let kind = entry.kind;
        let queue = entry.queue.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(resync);
            interval.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = interval.tick() => {
                        match store.list_value(kind, None).await {
                            Ok(values) => {
                                for value in values {
                                    enqueue_value(&scheme, kind, &queue, &value);
                                }
                            }
                            Err(e) => warn!("{} resync list failed: {}", kind.kind, e),
                        }
                    }
                }
            }
        })
    }

    fn spawn_worker(&self, entry: &ControllerEntry, worker: usize) -> JoinHandle<()> {
        let kind = entry.kind;
        let queue = entry.queue.clone();
        let reconciler = entry.reconciler.clone();
        let timeout = entry.options.reconcile_timeout;
        tokio::spawn(async move {
            while let Some(request) = queue.get().await {
                let outcome = tokio::time::timeout(timeout, reconciler.reconcile(&request)).await;
                queue.done(&request);
                match outcome {
                    Ok(Ok(ReconcileAction::Done)) => {
                        queue.forget(&request);
                    }
                    Ok(Ok(ReconcileAction::Requeue)) => {
                        queue.forget(&request);
                        queue.add(request);
                    }
                    Ok(Ok(ReconcileAction::RequeueAfter(delay))) => {
                        queue.forget(&request);
                        queue.add_after(request, delay);
                    }
                    Ok(Err(e)) => {
                        pkg_metrics::global().counter_inc(pkg_metrics::RECONCILE_ERRORS);
                        warn!(
                            "{} reconcile of {} failed (attempt {}): {:#}",
                            kind.kind,
                            request,
                            queue.num_retries(&request) + 1,
                            e
                        );
                        queue.add_rate_limited(request);
                    }
                    Err(_) => {
                        // Cancellation is not an error for bookkeeping
                        // purposes, but the item remains enqueued.
                        warn!(
                            "{} reconcile of {} exceeded {:?}, requeueing",
                            kind.kind, request, timeout
                        );
                        queue.add_after(request, Duration::from_secs(1));
                    }
                }
            }
            info!("{} worker {} exiting", kind.kind, worker);
        })
    }

    fn spawn_depth_gauge(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let queues: Vec<Arc<WorkQueue>> =
            self.controllers.iter().map(|c| c.queue.clone()).collect();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = interval.tick() => {
                        let depth: usize = queues.iter().map(|q| q.len()).sum();
                        pkg_metrics::global().gauge_set(WORKQUEUE_DEPTH, depth as i64);
                    }
                }
            }
        })
    }
}

/// Decode a store payload against the registered scheme and enqueue
/// its key. Payloads that fail to decode are skipped with a log so a
/// malformed record cannot wedge a worker.
fn enqueue_value(scheme: &SchemeRegistry, kind: KindSpec, queue: &WorkQueue, value: &Value) {
    if let Err(e) = scheme.decode(kind.kind, value) {
        warn!("Dropping {} watch payload: {}", kind.kind, e);
        return;
    }
    match request_from_value(value) {
        Some(request) => queue.add(request),
        None => warn!("Dropping {} watch payload with no metadata key", kind.kind),
    }
}

/// Build a reconcile request from a stored record value.
fn request_from_value(value: &Value) -> Option<ReconcileRequest> {
    let meta = value.get("metadata")?;
    let name = meta.get("name")?.as_str()?;
    let namespace = meta
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    Some(ReconcileRequest::new(namespace, name))
}
