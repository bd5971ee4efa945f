//! Reconcilers: one control loop per record kind, plus the tenant
//! resolver and the shared status/event helpers they use.

pub mod application;
pub mod broker;
pub mod events;
pub mod resolver;
pub mod resource;
pub mod status;
pub mod team;
pub mod tenant;

pub use application::ApplicationReconciler;
pub use broker::BrokerHealthReconciler;
pub use events::EventRecorder;
pub use resolver::{ResolveError, ResolveTarget, resolve_tenant};
pub use resource::ManagedResourceReconciler;
pub use team::TeamReconciler;
pub use tenant::TenantReconciler;
