//! Controller manager: watch fan-out, per-record work queues with
//! rate-limited retry, a worker pool per kind, and the scheme registry.

pub mod manager;
pub mod queue;
pub mod reconcile;
pub mod scheme;

pub use manager::{ControllerManager, ControllerOptions};
pub use queue::WorkQueue;
pub use reconcile::{ReconcileAction, ReconcileRequest, Reconciler};
pub use scheme::SchemeRegistry;
