use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use pkg_constants::labels::{TENANT_BARRIER, TENANT_LABEL};
use pkg_manager::{ReconcileAction, ReconcileRequest, Reconciler};
use pkg_state::{Store, StoreError, StoreExt};
use pkg_types::application::Application;
use pkg_types::meta::{KindSpec, Record};
use pkg_types::namespace::Namespace;
use pkg_types::resource::ManagedResource;
use pkg_types::team::Team;
use pkg_types::tenant::{Tenant, TenantPhase, TenantResourceCount};

use crate::events::EventRecorder;
use crate::status::update_status_with_fallback;

/// Reconciles tenants: owns the `tenant-<name>` namespace, keeps
/// aggregate resource counts current, and refuses deletion while any
/// labelled descendant survives.
pub struct TenantReconciler<S: Store> {
    store: Arc<S>,
    recorder: EventRecorder<S>,
}

impl<S: Store> TenantReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        let recorder = EventRecorder::new(store.clone());
        Self { store, recorder }
    }

    async fn handle_deletion(&self, tenant: Tenant) -> anyhow::Result<ReconcileAction> {
        if !tenant.metadata.has_barrier(TENANT_BARRIER) {
            return Ok(ReconcileAction::Done);
        }

        info!("Handling Tenant deletion: {}", tenant.metadata.name);

        let counts = self.count_labelled(&tenant.metadata.name).await?;
        let total = counts.teams + counts.applications + counts.resources;
        if total > 0 {
            self.recorder
                .warning(
                    &tenant,
                    "DeletionBlocked",
                    format!(
                        "tenant still has {} team(s), {} application(s), {} resource(s)",
                        counts.teams, counts.applications, counts.resources
                    ),
                )
                .await;
            return Err(anyhow::anyhow!(
                "tenant {} still has {} labelled record(s), delete them first",
                tenant.metadata.name,
                total
            ));
        }

        let mut tenant = tenant;
        tenant.metadata.remove_barrier(TENANT_BARRIER);
        self.store.update(&tenant).await?;
        info!("Tenant cleanup completed: {}", tenant.metadata.name);
        Ok(ReconcileAction::Done)
    }

    /// Count every record still carrying this tenant's label.
    async fn count_labelled(&self, tenant_name: &str) -> Result<TenantResourceCount, StoreError> {
        let labelled = |labels: &std::collections::HashMap<String, String>| {
            labels.get(TENANT_LABEL).map(String::as_str) == Some(tenant_name)
        };

        let teams: Vec<Team> = self.store.list(None).await?;
        let applications: Vec<Application> = self.store.list(None).await?;
        let resources: Vec<ManagedResource> = self.store.list(None).await?;

        Ok(TenantResourceCount {
            teams: teams.iter().filter(|t| labelled(&t.metadata.labels)).count() as u32,
            applications: applications
                .iter()
                .filter(|a| labelled(&a.metadata.labels))
                .count() as u32,
            resources: resources
                .iter()
                .filter(|r| labelled(&r.metadata.labels))
                .count() as u32,
        })
    }

    /// Ensure the `tenant-<name>` namespace exists and carries the
    /// tenant label.
    async fn ensure_namespace(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let ns_name = tenant.namespace_name();
        match self.store.get::<Namespace>(None, &ns_name).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("Creating namespace for tenant: {}", ns_name);
                let mut ns = Namespace::new(&ns_name);
                ns.metadata
                    .labels
                    .insert(TENANT_LABEL.to_string(), tenant.metadata.name.clone());
                match self.store.create(&ns).await {
                    Ok(_) => Ok(()),
                    // Lost a race with another writer; the namespace exists.
                    Err(StoreError::AlreadyExists { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<S: Store> Reconciler for TenantReconciler<S> {
    fn kind(&self) -> KindSpec {
        Tenant::kind_spec()
    }

    async fn reconcile(&self, request: &ReconcileRequest) -> anyhow::Result<ReconcileAction> {
        let tenant: Tenant = match self.store.get(None, &request.name).await {
            Ok(t) => t,
            Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
            Err(e) => return Err(e.into()),
        };

        if tenant.metadata.is_deleting() {
            return self.handle_deletion(tenant).await;
        }

        // The barrier write is committed on its own so observers always
        // see it before any side effects.
        if !tenant.metadata.has_barrier(TENANT_BARRIER) {
            let mut tenant = tenant;
            tenant.metadata.add_barrier(TENANT_BARRIER);
            self.store.update(&tenant).await?;
            return Ok(ReconcileAction::Requeue);
        }

        self.ensure_namespace(&tenant).await?;

        let counts = self.count_labelled(&tenant.metadata.name).await?;
        let mut tenant = tenant;
        let mut changed = false;
        if tenant.status.phase.is_none() {
            tenant.status.phase = Some(TenantPhase::Active);
            changed = true;
        }
        if tenant.status.resource_count != Some(counts) {
            tenant.status.resource_count = Some(counts);
            changed = true;
        }
        if tenant.status.observed_generation != tenant.metadata.generation {
            tenant.status.observed_generation = tenant.metadata.generation;
            changed = true;
        }
        if changed {
            tenant.status.last_updated = Some(Utc::now());
            update_status_with_fallback(self.store.as_ref(), &tenant).await?;
        }

        Ok(ReconcileAction::Done)
    }
}
