use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use pkg_constants::labels::{APPLICATION_BARRIER, TENANT_LABEL};
use pkg_manager::{ReconcileAction, ReconcileRequest, Reconciler};
use pkg_state::{Store, StoreError, StoreExt};
use pkg_types::application::{Application, ApplicationPhase};
use pkg_types::meta::{KindSpec, Record};
use pkg_types::reference::OwnerKind;
use pkg_types::resource::ManagedResource;

use crate::events::EventRecorder;
use crate::resolver::{ResolveTarget, resolve_tenant};
use crate::status::update_status_with_fallback;

/// Reconciles applications: attribution through the resolver (owner
/// chain or namespace label) and deletion safety against same-namespace
/// managed resources that name this application as owner.
pub struct ApplicationReconciler<S: Store> {
    store: Arc<S>,
    recorder: EventRecorder<S>,
}

impl<S: Store> ApplicationReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        let recorder = EventRecorder::new(store.clone());
        Self { store, recorder }
    }

    async fn handle_deletion(&self, app: Application) -> anyhow::Result<ReconcileAction> {
        if !app.metadata.has_barrier(APPLICATION_BARRIER) {
            return Ok(ReconcileAction::Done);
        }

        info!("Handling Application deletion: {}", app.metadata.name);

        let owned = self.owned_resources(&app).await?;
        if owned > 0 {
            self.recorder
                .warning(
                    &app,
                    "DeletionBlocked",
                    format!("application still owns {} resource(s)", owned),
                )
                .await;
            return Err(anyhow::anyhow!(
                "application {} still owns {} resource(s), delete them first",
                app.metadata.name,
                owned
            ));
        }

        let mut app = app;
        app.metadata.remove_barrier(APPLICATION_BARRIER);
        self.store.update(&app).await?;
        info!("Application cleanup completed: {}", app.metadata.name);
        Ok(ReconcileAction::Done)
    }

    /// Managed resources in this application's namespace naming it as
    /// owner.
    async fn owned_resources(&self, app: &Application) -> Result<usize, StoreError> {
        let resources: Vec<ManagedResource> = self.store.list(app.namespace()).await?;
        Ok(resources
            .iter()
            .filter(|r| {
                r.spec
                    .owner
                    .as_ref()
                    .map(|o| o.kind == OwnerKind::Application && o.name == app.metadata.name)
                    .unwrap_or(false)
            })
            .count())
    }
}

#[async_trait]
impl<S: Store> Reconciler for ApplicationReconciler<S> {
    fn kind(&self) -> KindSpec {
        Application::kind_spec()
    }

    async fn reconcile(&self, request: &ReconcileRequest) -> anyhow::Result<ReconcileAction> {
        let app: Application = match self
            .store
            .get(request.namespace.as_deref(), &request.name)
            .await
        {
            Ok(a) => a,
            Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
            Err(e) => return Err(e.into()),
        };

        if app.metadata.is_deleting() {
            return self.handle_deletion(app).await;
        }

        if !app.metadata.has_barrier(APPLICATION_BARRIER) {
            let mut app = app;
            app.metadata.add_barrier(APPLICATION_BARRIER);
            self.store.update(&app).await?;
            return Ok(ReconcileAction::Requeue);
        }

        // New applications start as drafts before attribution settles.
        let mut app = app;
        if app.status.phase.is_none() {
            app.status.phase = Some(ApplicationPhase::Draft);
            app = update_status_with_fallback(self.store.as_ref(), &app).await?;
        }

        let tenant = match resolve_tenant(self.store.as_ref(), ResolveTarget::Application(&app)).await
        {
            Ok(tenant) => tenant,
            Err(e) if e.is_unresolvable() => {
                info!(
                    "Unable to resolve tenant for application {}, suspending: {}",
                    app.metadata.name, e
                );
                self.recorder
                    .warning(&app, "TenantUnresolved", format!("tenant could not be resolved: {}", e))
                    .await;
                app.status.phase = Some(ApplicationPhase::Suspended);
                update_status_with_fallback(self.store.as_ref(), &app).await?;
                // No requeue: an owner or tenant change re-enqueues.
                return Ok(ReconcileAction::Done);
            }
            Err(e) => return Err(e.into()),
        };

        if app.metadata.labels.get(TENANT_LABEL) != Some(&tenant.metadata.name) {
            app.metadata
                .labels
                .insert(TENANT_LABEL.to_string(), tenant.metadata.name.clone());
            self.store.update(&app).await?;
            self.recorder
                .normal(
                    &app,
                    "TenantAssigned",
                    format!("assigned tenant {}", tenant.metadata.name),
                )
                .await;
            return Ok(ReconcileAction::Requeue);
        }

        let mut changed = false;
        if app.status.phase == Some(ApplicationPhase::Suspended) {
            // Attribution recovered.
            app.status.phase = Some(ApplicationPhase::Draft);
            changed = true;
        }
        if app.status.observed_generation != app.metadata.generation {
            app.status.observed_generation = app.metadata.generation;
            changed = true;
        }
        if changed {
            update_status_with_fallback(self.store.as_ref(), &app).await?;
        }

        Ok(ReconcileAction::Done)
    }
}
