use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use pkg_types::meta::KindSpec;

/// The key of a record to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: Option<String>,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Queue key: `namespace/name`, or just `name` for cluster-scoped.
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// What the work queue should do with the item after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing further until the record changes.
    Done,
    /// Re-enqueue immediately (a write was split from later steps).
    Requeue,
    /// Re-enqueue after a fixed delay (periodic work like health probes).
    RequeueAfter(Duration),
}

/// Control-loop for one record kind: invoked with a record key, drives
/// the record toward its desired state. Errors go back to the work
/// queue for rate-limited retry.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn kind(&self) -> KindSpec;

    async fn reconcile(&self, request: &ReconcileRequest) -> anyhow::Result<ReconcileAction>;
}
