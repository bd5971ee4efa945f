use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use pkg_constants::labels::{RESOURCE_BARRIER, TENANT_LABEL};
use pkg_dispatch::{DeprovisionRequest, Dispatcher, ProvisionRequest};
use pkg_manager::{ReconcileAction, ReconcileRequest, Reconciler};
use pkg_metrics::{DEPROVISIONS_DISPATCHED, PROVISIONS_DISPATCHED};
use pkg_registry::{Registry, RegistryError, SelectionCriteria};
use pkg_state::{Store, StoreExt};
use pkg_types::broker::Broker;
use pkg_types::meta::{KindSpec, Record};
use pkg_types::reference::ObjectRef;
use pkg_types::resource::{ManagedResource, ResourcePhase};

use crate::events::EventRecorder;
use crate::resolver::{ResolveTarget, resolve_tenant};
use crate::status::update_status_with_fallback;

/// Reconciles managed resources: the provision/deprovision hot path.
///
/// The ordering that correctness hinges on: the removal-barrier is
/// committed before any outbound call, and the correlation ID plus the
/// selected broker land in one status write immediately after the
/// broker accepts. A crash between accept and that write leaks a
/// broker-side deployment; the broker's own garbage collection handles
/// it, and the retry acquires a fresh correlation ID.
pub struct ManagedResourceReconciler<S: Store> {
    store: Arc<S>,
    registry: Arc<Registry<S>>,
    dispatcher: Arc<dyn Dispatcher>,
    callback_url: String,
    recorder: EventRecorder<S>,
}

impl<S: Store> ManagedResourceReconciler<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<Registry<S>>,
        dispatcher: Arc<dyn Dispatcher>,
        callback_url: String,
    ) -> Self {
        let recorder = EventRecorder::new(store.clone());
        Self {
            store,
            registry,
            dispatcher,
            callback_url,
            recorder,
        }
    }

    fn selection_criteria(resource: &ManagedResource) -> SelectionCriteria {
        SelectionCriteria {
            resource_kind: ManagedResource::KIND.to_string(),
            provider: Some(resource.spec.engine.to_string()),
            ..Default::default()
        }
    }

    async fn handle_deletion(&self, resource: ManagedResource) -> anyhow::Result<ReconcileAction> {
        if !resource.metadata.has_barrier(RESOURCE_BARRIER) {
            return Ok(ReconcileAction::Done);
        }

        info!(
            "Handling resource deletion: {}/{} (correlation {:?})",
            resource.namespace().unwrap_or_default(),
            resource.metadata.name,
            resource.status.correlation_id
        );

        let mut resource = resource;
        if resource.status.phase != ResourcePhase::Deleting {
            resource.status.phase = ResourcePhase::Deleting;
            resource = update_status_with_fallback(self.store.as_ref(), &resource).await?;
        }

        self.deprovision(&resource).await?;

        resource.metadata.remove_barrier(RESOURCE_BARRIER);
        self.store.update(&resource).await?;
        info!("Resource cleanup completed: {}", resource.metadata.name);
        Ok(ReconcileAction::Done)
    }

    /// Dispatch deprovision for a resource that was provisioned.
    /// Prefers the broker recorded at provision time; falls back to
    /// capability-based selection; skips entirely when no broker
    /// matches so records orphaned by broker retirement stay deletable.
    async fn deprovision(&self, resource: &ManagedResource) -> anyhow::Result<()> {
        let Some(correlation_id) = resource.status.correlation_id.clone() else {
            return Ok(());
        };

        let broker = match self.recorded_broker(resource).await? {
            Some(broker) => Some(broker),
            None => match self.registry.select(&Self::selection_criteria(resource)).await {
                Ok(broker) => Some(broker),
                Err(RegistryError::NoBrokerAvailable { .. }) => {
                    warn!(
                        "No broker available to deprovision {}; continuing cleanup anyway",
                        resource.metadata.name
                    );
                    None
                }
                Err(e) => return Err(e.into()),
            },
        };

        let Some(broker) = broker else {
            return Ok(());
        };

        let request = DeprovisionRequest {
            deployment_id: correlation_id.clone(),
            resource_type: ManagedResource::KIND.to_string(),
            resource_name: resource.metadata.name.clone(),
            namespace: resource.namespace().unwrap_or_default().to_string(),
            callback_url: self.callback_url.clone(),
        };

        // Any failure keeps the barrier attached; the queue retries.
        self.dispatcher
            .deprovision(&broker.spec.endpoint, &request)
            .await
            .map_err(|e| anyhow::anyhow!("failed to call broker deprovision: {}", e))?;

        pkg_metrics::global().counter_inc(DEPROVISIONS_DISPATCHED);
        info!(
            "Deprovisioning request accepted by broker {} (correlation {})",
            broker.metadata.name, correlation_id
        );
        Ok(())
    }

    async fn recorded_broker(
        &self,
        resource: &ManagedResource,
    ) -> anyhow::Result<Option<Broker>> {
        let Some(broker_ref) = &resource.status.broker_ref else {
            return Ok(None);
        };
        let namespace = broker_ref
            .namespace
            .as_deref()
            .or(resource.namespace())
            .unwrap_or_default()
            .to_string();
        match self
            .store
            .get::<Broker>(Some(&namespace), &broker_ref.name)
            .await
        {
            Ok(broker) => Ok(Some(broker)),
            Err(e) if e.is_not_found() => {
                info!(
                    "Recorded broker {} not found, falling back to registry selection",
                    broker_ref.name
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Select a broker and dispatch provision; on accept, the
    /// correlation ID, broker reference and Provisioning phase are
    /// committed in a single status write.
    async fn provision(&self, mut resource: ManagedResource) -> anyhow::Result<ReconcileAction> {
        if let Some(target) = &resource.spec.target {
            info!(
                "Resource {} has placement target {}",
                resource.metadata.name, target
            );
        }

        // Selection failure leaves the phase untouched (Pending) and
        // retries with backoff.
        let broker = self
            .registry
            .select(&Self::selection_criteria(&resource))
            .await?;

        info!(
            "Selected broker {} for {} (endpoint={}, provider={}, region={:?})",
            broker.metadata.name,
            resource.metadata.name,
            broker.spec.endpoint,
            broker.spec.cloud_provider,
            broker.spec.region
        );

        let owner = resource.spec.owner.as_ref();
        let mut spec = serde_json::Map::new();
        spec.insert("engine".to_string(), json!(resource.spec.engine));
        spec.insert("version".to_string(), json!(resource.spec.version));
        spec.insert("size".to_string(), json!(resource.spec.size));
        if let Some(target) = &resource.spec.target {
            spec.insert("target".to_string(), json!(target));
        }
        if resource.spec.high_availability {
            spec.insert("highAvailability".to_string(), json!(true));
        }
        if !resource.spec.parameters.is_empty() {
            spec.insert("parameters".to_string(), json!(resource.spec.parameters));
        }

        let request = ProvisionRequest {
            resource_type: ManagedResource::KIND.to_string(),
            resource_name: resource.metadata.name.clone(),
            namespace: resource.namespace().unwrap_or_default().to_string(),
            team: owner
                .map(|o| format!("{}/{}", o.kind, o.name))
                .unwrap_or_default(),
            owner: owner.map(|o| o.name.clone()).unwrap_or_default(),
            callback_url: self.callback_url.clone(),
            spec,
        };

        let response = match self
            .dispatcher
            .provision(&broker.spec.endpoint, &request)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_permanent() => {
                // Broker rejected the request outright; operator
                // intervention is required.
                self.recorder
                    .warning(
                        &resource,
                        "ProvisionRejected",
                        format!("broker {} rejected provision: {}", broker.metadata.name, e),
                    )
                    .await;
                resource.status.phase = ResourcePhase::Failed;
                resource.status.message = Some(e.to_string());
                update_status_with_fallback(self.store.as_ref(), &resource).await?;
                return Err(anyhow::anyhow!("broker provision rejected: {}", e));
            }
            Err(e) => {
                // Transient transport failure: never recorded as Failed.
                return Err(anyhow::anyhow!("failed to call broker provision: {}", e));
            }
        };

        // Correlation ID and broker reference are write-once; both land
        // in one status update together with the phase.
        resource.status.phase = ResourcePhase::Provisioning;
        resource.status.correlation_id = Some(response.deployment_id.clone());
        resource.status.broker_ref = Some(ObjectRef {
            name: broker.metadata.name.clone(),
            namespace: broker.metadata.namespace.clone(),
        });
        resource.status.observed_generation = resource.metadata.generation;
        update_status_with_fallback(self.store.as_ref(), &resource).await?;

        pkg_metrics::global().counter_inc(PROVISIONS_DISPATCHED);
        self.recorder
            .normal(
                &resource,
                "ProvisioningStarted",
                format!(
                    "broker {} accepted deployment {}",
                    broker.metadata.name, response.deployment_id
                ),
            )
            .await;
        info!(
            "Broker accepted provisioning request: correlation={}, broker={}",
            response.deployment_id, broker.metadata.name
        );

        Ok(ReconcileAction::Done)
    }
}

#[async_trait]
impl<S: Store> Reconciler for ManagedResourceReconciler<S> {
    fn kind(&self) -> KindSpec {
        ManagedResource::kind_spec()
    }

    async fn reconcile(&self, request: &ReconcileRequest) -> anyhow::Result<ReconcileAction> {
        let resource: ManagedResource = match self
            .store
            .get(request.namespace.as_deref(), &request.name)
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
            Err(e) => return Err(e.into()),
        };

        if resource.metadata.is_deleting() {
            return self.handle_deletion(resource).await;
        }

        if !resource.metadata.has_barrier(RESOURCE_BARRIER) {
            let mut resource = resource;
            resource.metadata.add_barrier(RESOURCE_BARRIER);
            self.store.update(&resource).await?;
            return Ok(ReconcileAction::Requeue);
        }

        let tenant = match resolve_tenant(self.store.as_ref(), ResolveTarget::Resource(&resource)).await
        {
            Ok(tenant) => tenant,
            Err(e) if e.is_unresolvable() => {
                info!(
                    "Unable to resolve tenant for resource {}, suspending: {}",
                    resource.metadata.name, e
                );
                self.recorder
                    .warning(
                        &resource,
                        "TenantUnresolved",
                        format!("tenant could not be resolved: {}", e),
                    )
                    .await;
                let mut resource = resource;
                resource.status.phase = ResourcePhase::Suspended;
                update_status_with_fallback(self.store.as_ref(), &resource).await?;
                return Ok(ReconcileAction::Done);
            }
            Err(e) => return Err(e.into()),
        };

        if resource.metadata.labels.get(TENANT_LABEL) != Some(&tenant.metadata.name) {
            let mut resource = resource;
            resource
                .metadata
                .labels
                .insert(TENANT_LABEL.to_string(), tenant.metadata.name.clone());
            self.store.update(&resource).await?;
            self.recorder
                .normal(
                    &resource,
                    "TenantAssigned",
                    format!("assigned tenant {}", tenant.metadata.name),
                )
                .await;
            return Ok(ReconcileAction::Requeue);
        }

        // Provisioning already in flight or complete: status changes
        // arrive via callbacks, not from this loop.
        if resource.status.correlation_id.is_some() {
            if resource.status.observed_generation != resource.metadata.generation {
                let mut resource = resource;
                resource.status.observed_generation = resource.metadata.generation;
                update_status_with_fallback(self.store.as_ref(), &resource).await?;
            }
            return Ok(ReconcileAction::Done);
        }

        // A failed dispatch is terminal for the automatic path: delete
        // and recreate, or edit the spec.
        if resource.status.phase == ResourcePhase::Failed {
            return Ok(ReconcileAction::Done);
        }

        self.provision(resource).await
    }
}
