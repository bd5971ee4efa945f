use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use pkg_constants::labels::{TEAM_BARRIER, TENANT_LABEL};
use pkg_manager::{ReconcileAction, ReconcileRequest, Reconciler};
use pkg_state::{Store, StoreError, StoreExt};
use pkg_types::application::Application;
use pkg_types::meta::{KindSpec, Record};
use pkg_types::namespace::Namespace;
use pkg_types::reference::{ObjectRef, OwnerKind};
use pkg_types::resource::ManagedResource;
use pkg_types::team::{Team, TeamPhase, TeamResourceCount};
use pkg_types::tenant::Tenant;

use crate::events::EventRecorder;
use crate::status::update_status_with_fallback;

/// Reconciles teams. Attribution prefers the explicit tenant reference;
/// a reference inferred from the namespace label is written back into
/// the spec (one-time bootstrap) so downstream logic always sees it set.
pub struct TeamReconciler<S: Store> {
    store: Arc<S>,
    recorder: EventRecorder<S>,
}

impl<S: Store> TeamReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        let recorder = EventRecorder::new(store.clone());
        Self { store, recorder }
    }

    async fn handle_deletion(&self, team: Team) -> anyhow::Result<ReconcileAction> {
        if !team.metadata.has_barrier(TEAM_BARRIER) {
            return Ok(ReconcileAction::Done);
        }

        info!("Handling Team deletion: {}", team.metadata.name);

        let owned = self.owned_resources(&team).await?;
        if owned > 0 {
            let mut team = team;
            team.status.phase = Some(TeamPhase::Deleting);
            update_status_with_fallback(self.store.as_ref(), &team).await?;
            self.recorder
                .warning(
                    &team,
                    "DeletionBlocked",
                    format!("team still owns {} resource(s)", owned),
                )
                .await;
            return Err(anyhow::anyhow!(
                "team {} still owns {} resource(s), delete them first",
                team.metadata.name,
                owned
            ));
        }

        let mut team = team;
        team.metadata.remove_barrier(TEAM_BARRIER);
        self.store.update(&team).await?;
        info!("Team cleanup completed: {}", team.metadata.name);
        Ok(ReconcileAction::Done)
    }

    /// Managed resources in any namespace naming this team as owner.
    async fn owned_resources(&self, team: &Team) -> Result<usize, StoreError> {
        let resources: Vec<ManagedResource> = self.store.list(None).await?;
        Ok(resources
            .iter()
            .filter(|r| {
                r.spec
                    .owner
                    .as_ref()
                    .map(|o| o.kind == OwnerKind::Team && o.name == team.metadata.name)
                    .unwrap_or(false)
            })
            .count())
    }

    async fn resource_counts(&self, team: &Team) -> Result<TeamResourceCount, StoreError> {
        let owned_by_team = |owner: Option<&pkg_types::reference::OwnerReference>| {
            owner
                .map(|o| o.kind == OwnerKind::Team && o.name == team.metadata.name)
                .unwrap_or(false)
        };

        let applications: Vec<Application> = self.store.list(None).await?;
        let resources: Vec<ManagedResource> = self.store.list(None).await?;

        Ok(TeamResourceCount {
            applications: applications
                .iter()
                .filter(|a| owned_by_team(a.spec.owner.as_ref()))
                .count() as u32,
            resources: resources
                .iter()
                .filter(|r| owned_by_team(r.spec.owner.as_ref()))
                .count() as u32,
        })
    }

    async fn suspend(&self, mut team: Team, why: String) -> anyhow::Result<ReconcileAction> {
        info!("Suspending team {}: {}", team.metadata.name, why);
        self.recorder.warning(&team, "TenantUnresolved", why).await;
        team.status.phase = Some(TeamPhase::Suspended);
        update_status_with_fallback(self.store.as_ref(), &team).await?;
        // No requeue: a tenant or namespace change will re-enqueue.
        Ok(ReconcileAction::Done)
    }
}

#[async_trait]
impl<S: Store> Reconciler for TeamReconciler<S> {
    fn kind(&self) -> KindSpec {
        Team::kind_spec()
    }

    async fn reconcile(&self, request: &ReconcileRequest) -> anyhow::Result<ReconcileAction> {
        let team: Team = match self
            .store
            .get(request.namespace.as_deref(), &request.name)
            .await
        {
            Ok(t) => t,
            Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
            Err(e) => return Err(e.into()),
        };

        if team.metadata.is_deleting() {
            return self.handle_deletion(team).await;
        }

        if !team.metadata.has_barrier(TEAM_BARRIER) {
            let mut team = team;
            team.metadata.add_barrier(TEAM_BARRIER);
            self.store.update(&team).await?;
            return Ok(ReconcileAction::Requeue);
        }

        // Attribution: explicit tenant reference first.
        let tenant: Tenant = match &team.spec.tenant_ref {
            Some(tenant_ref) => {
                match self.store.get::<Tenant>(None, &tenant_ref.name).await {
                    Ok(tenant) => tenant,
                    Err(e) if e.is_not_found() => {
                        let why = format!("referenced tenant {} not found", tenant_ref.name);
                        return self.suspend(team, why).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                // Infer from the namespace label and write the reference
                // back into the spec so it is explicit from here on.
                let ns_name = team.namespace().unwrap_or_default().to_string();
                let inferred = match self.store.get::<Namespace>(None, &ns_name).await {
                    Ok(ns) => ns
                        .metadata
                        .labels
                        .get(TENANT_LABEL)
                        .filter(|t| !t.is_empty())
                        .cloned(),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e.into()),
                };
                match inferred {
                    Some(tenant_name) => {
                        info!(
                            "Team {} inferred tenant {} from namespace label",
                            team.metadata.name, tenant_name
                        );
                        let mut team = team;
                        team.spec.tenant_ref = Some(ObjectRef::new(tenant_name));
                        self.store.update(&team).await?;
                        // Requeue so the loop re-enters with the
                        // reference set explicitly.
                        return Ok(ReconcileAction::Requeue);
                    }
                    None => {
                        let why =
                            "no tenantRef set and no tenant label on namespace".to_string();
                        return self.suspend(team, why).await;
                    }
                }
            }
        };

        // Tenant label stamp.
        if team.metadata.labels.get(TENANT_LABEL) != Some(&tenant.metadata.name) {
            let mut team = team;
            team.metadata
                .labels
                .insert(TENANT_LABEL.to_string(), tenant.metadata.name.clone());
            self.store.update(&team).await?;
            self.recorder
                .normal(
                    &team,
                    "TenantAssigned",
                    format!("assigned tenant {}", tenant.metadata.name),
                )
                .await;
            return Ok(ReconcileAction::Requeue);
        }

        let counts = self.resource_counts(&team).await?;
        let mut team = team;
        let mut changed = false;
        if team.status.phase.is_none() || team.status.phase == Some(TeamPhase::Suspended) {
            team.status.phase = Some(TeamPhase::Active);
            changed = true;
        }
        if team.status.resource_count != Some(counts) {
            team.status.resource_count = Some(counts);
            changed = true;
        }
        if team.status.observed_generation != team.metadata.generation {
            team.status.observed_generation = team.metadata.generation;
            changed = true;
        }
        if changed {
            update_status_with_fallback(self.store.as_ref(), &team).await?;
        }

        Ok(ReconcileAction::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::MemoryStore;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::reference::OwnerReference;
    use pkg_types::resource::{Engine, ManagedResourceSpec, SizeClass};
    use pkg_types::team::TeamSpec;
    use pkg_types::tenant::TenantSpec;

    fn make_tenant(name: &str) -> Tenant {
        Tenant {
            metadata: ObjectMeta::new(name),
            spec: TenantSpec {
                display_name: name.to_string(),
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    fn make_team(namespace: &str, name: &str) -> Team {
        Team {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: TeamSpec {
                display_name: name.to_string(),
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    async fn settle(reconciler: &TeamReconciler<MemoryStore>, namespace: &str, name: &str) {
        for _ in 0..5 {
            let request = ReconcileRequest::new(Some(namespace), name);
            match reconciler.reconcile(&request).await.unwrap() {
                ReconcileAction::Requeue => continue,
                _ => break,
            }
        }
    }

    #[tokio::test]
    async fn test_infers_tenant_ref_from_namespace_label() {
        let store = Arc::new(MemoryStore::new());
        store.create(&make_tenant("acme")).await.unwrap();
        let mut ns = Namespace::new("dev");
        ns.metadata
            .labels
            .insert(TENANT_LABEL.to_string(), "acme".to_string());
        store.create(&ns).await.unwrap();
        store.create(&make_team("dev", "platform")).await.unwrap();

        let reconciler = TeamReconciler::new(store.clone());
        settle(&reconciler, "dev", "platform").await;

        let team: Team = store.get(Some("dev"), "platform").await.unwrap();
        // Self-healing: the inferred reference is persisted in the spec.
        assert_eq!(team.spec.tenant_ref.as_ref().unwrap().name, "acme");
        assert_eq!(team.metadata.labels.get(TENANT_LABEL).unwrap(), "acme");
        assert_eq!(team.status.phase, Some(TeamPhase::Active));
    }

    #[tokio::test]
    async fn test_suspends_without_tenant() {
        let store = Arc::new(MemoryStore::new());
        store.create(&make_team("dev", "platform")).await.unwrap();

        let reconciler = TeamReconciler::new(store.clone());
        settle(&reconciler, "dev", "platform").await;

        let team: Team = store.get(Some("dev"), "platform").await.unwrap();
        assert_eq!(team.status.phase, Some(TeamPhase::Suspended));
    }

    #[tokio::test]
    async fn test_deletion_blocked_while_owning_resources() {
        let store = Arc::new(MemoryStore::new());
        store.create(&make_tenant("acme")).await.unwrap();
        let mut team = make_team("dev", "platform");
        team.spec.tenant_ref = Some(ObjectRef::new("acme"));
        store.create(&team).await.unwrap();

        let reconciler = TeamReconciler::new(store.clone());
        settle(&reconciler, "dev", "platform").await;

        let db = ManagedResource {
            metadata: ObjectMeta::namespaced("dev", "db1"),
            spec: ManagedResourceSpec {
                owner: Some(OwnerReference::new(OwnerKind::Team, "platform")),
                engine: Engine::Postgresql,
                version: "16".to_string(),
                size: SizeClass::Small,
                target: None,
                backup: None,
                encryption: None,
                high_availability: false,
                parameters: Default::default(),
            },
            status: Default::default(),
        };
        store.create(&db).await.unwrap();

        store.delete::<Team>(Some("dev"), "platform").await.unwrap();
        let request = ReconcileRequest::new(Some("dev"), "platform");
        let err = reconciler.reconcile(&request).await.unwrap_err();
        // The error enumerates the offending descendant count.
        assert!(err.to_string().contains("1 resource(s)"));

        let team: Team = store.get(Some("dev"), "platform").await.unwrap();
        assert_eq!(team.status.phase, Some(TeamPhase::Deleting));

        store.delete::<ManagedResource>(Some("dev"), "db1").await.unwrap();
        reconciler.reconcile(&request).await.unwrap();
        assert!(
            store
                .get::<Team>(Some("dev"), "platform")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
