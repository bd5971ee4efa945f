//! Full control-loop lifecycle against the in-memory store: a tenant
//! chain is reconciled, a resource is provisioned through a broker,
//! the broker's signed callback lands, and deletion tears everything
//! down in the safe order.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use std::sync::{Arc, Mutex};

use pkg_api::AppState;
use pkg_api::handlers::callback::handle_callback;
use pkg_constants::labels::TENANT_LABEL;
use pkg_controllers::{
    ManagedResourceReconciler, TeamReconciler, TenantReconciler,
};
use pkg_dispatch::{
    CallbackRequest, CallbackStatus, DeprovisionRequest, DeprovisionResponse, DispatchError,
    Dispatcher, ProvisionRequest, ProvisionResponse,
};
use pkg_manager::{ReconcileAction, ReconcileRequest, Reconciler};
use pkg_registry::Registry;
use pkg_signing::{
    BROKER_NAME_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, encode_verifying_key, sign_payload,
};
use pkg_state::{MemoryStore, StoreExt};
use pkg_types::broker::{Broker, BrokerPhase, BrokerSpec, BrokerStatus, Capability, CloudProvider};
use pkg_types::meta::ObjectMeta;
use pkg_types::namespace::Namespace;
use pkg_types::reference::{ObjectRef, OwnerKind, OwnerReference};
use pkg_types::resource::{
    Engine, ManagedResource, ManagedResourceSpec, ResourcePhase, SizeClass,
};
use pkg_types::team::{Team, TeamSpec};
use pkg_types::tenant::{Tenant, TenantSpec};

/// Accepts every dispatch and records it, like a healthy broker.
struct AcceptingDispatcher {
    provisions: Mutex<Vec<ProvisionRequest>>,
    deprovisions: Mutex<Vec<DeprovisionRequest>>,
}

impl AcceptingDispatcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            provisions: Mutex::new(Vec::new()),
            deprovisions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Dispatcher for AcceptingDispatcher {
    async fn provision(
        &self,
        _endpoint: &str,
        request: &ProvisionRequest,
    ) -> Result<ProvisionResponse, DispatchError> {
        self.provisions.lock().unwrap().push(request.clone());
        Ok(ProvisionResponse {
            status: "accepted".to_string(),
            deployment_id: format!("d-{}", request.resource_name),
            message: "accepted".to_string(),
        })
    }

    async fn deprovision(
        &self,
        _endpoint: &str,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, DispatchError> {
        self.deprovisions.lock().unwrap().push(request.clone());
        Ok(DeprovisionResponse {
            status: "accepted".to_string(),
            message: "accepted".to_string(),
        })
    }
}

async fn settle<R: Reconciler>(reconciler: &R, namespace: Option<&str>, name: &str) {
    for _ in 0..8 {
        let request = ReconcileRequest::new(namespace, name);
        match reconciler.reconcile(&request).await.unwrap() {
            ReconcileAction::Requeue => continue,
            _ => break,
        }
    }
}

fn signed_headers(key: &SigningKey, body: &[u8]) -> HeaderMap {
    let timestamp = Utc::now().to_rfc3339();
    let mut headers = HeaderMap::new();
    headers.insert(BROKER_NAME_HEADER, "b1".parse().unwrap());
    headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
    headers.insert(
        SIGNATURE_HEADER,
        sign_payload(key, &timestamp, body).parse().unwrap(),
    );
    headers
}

#[tokio::test]
async fn test_resource_lifecycle_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let broker_key = SigningKey::from_bytes(&[11u8; 32]);

    // Seed the world: a tenant, a broker with a registered key.
    store
        .create(&Tenant {
            metadata: ObjectMeta::new("acme"),
            spec: TenantSpec {
                display_name: "Acme Corp".to_string(),
                ..Default::default()
            },
            status: Default::default(),
        })
        .await
        .unwrap();
    store
        .create(&Broker {
            metadata: ObjectMeta::namespaced("default", "b1"),
            spec: BrokerSpec {
                endpoint: "http://b1.example:8080".to_string(),
                cloud_provider: CloudProvider::Aws,
                region: Some("us-east-1".to_string()),
                capabilities: vec![Capability {
                    resource_kind: "ManagedResource".to_string(),
                    providers: vec!["postgresql".to_string()],
                    regions: vec![],
                }],
                health_check: None,
                priority: 100,
                max_concurrent_deployments: 10,
            },
            status: BrokerStatus {
                phase: BrokerPhase::Ready,
                callback_public_key: Some(encode_verifying_key(&broker_key.verifying_key())),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    // The tenant reconciler creates and labels the tenant namespace.
    let tenant_reconciler = TenantReconciler::new(store.clone());
    settle(&tenant_reconciler, None, "acme").await;
    let ns: Namespace = store.get(None, "tenant-acme").await.unwrap();
    assert_eq!(ns.metadata.labels.get(TENANT_LABEL).unwrap(), "acme");

    // A team in that namespace self-heals its tenant reference.
    store
        .create(&Team {
            metadata: ObjectMeta::namespaced("tenant-acme", "payments"),
            spec: TeamSpec {
                display_name: "Payments".to_string(),
                ..Default::default()
            },
            status: Default::default(),
        })
        .await
        .unwrap();
    let team_reconciler = TeamReconciler::new(store.clone());
    settle(&team_reconciler, Some("tenant-acme"), "payments").await;
    let team: Team = store.get(Some("tenant-acme"), "payments").await.unwrap();
    assert_eq!(team.spec.tenant_ref, Some(ObjectRef::new("acme")));

    // A database owned by the team provisions through the broker.
    store
        .create(&ManagedResource {
            metadata: ObjectMeta::namespaced("tenant-acme", "orders-db"),
            spec: ManagedResourceSpec {
                owner: Some(OwnerReference::new(OwnerKind::Team, "payments")),
                engine: Engine::Postgresql,
                version: "16".to_string(),
                size: SizeClass::Medium,
                target: None,
                backup: None,
                encryption: None,
                high_availability: true,
                parameters: Default::default(),
            },
            status: Default::default(),
        })
        .await
        .unwrap();

    let registry = Arc::new(Registry::new(store.clone()));
    let dispatcher = AcceptingDispatcher::new();
    let resource_reconciler = ManagedResourceReconciler::new(
        store.clone(),
        registry,
        dispatcher.clone(),
        "http://manager.example:9090".to_string(),
    );
    settle(&resource_reconciler, Some("tenant-acme"), "orders-db").await;

    let resource: ManagedResource = store.get(Some("tenant-acme"), "orders-db").await.unwrap();
    assert_eq!(resource.metadata.labels.get(TENANT_LABEL).unwrap(), "acme");
    assert_eq!(resource.status.phase, ResourcePhase::Provisioning);
    assert_eq!(resource.status.correlation_id.as_deref(), Some("d-orders-db"));
    assert_eq!(resource.status.broker_ref.as_ref().unwrap().name, "b1");
    assert_eq!(dispatcher.provisions.lock().unwrap().len(), 1);

    // The broker reports success through the signed callback endpoint.
    let api_state = AppState {
        store: store.clone(),
        join_token: "secret-token".to_string(),
    };
    let callback = CallbackRequest {
        deployment_id: "d-orders-db".to_string(),
        resource_type: "ManagedResource".to_string(),
        resource_name: "orders-db".to_string(),
        namespace: "tenant-acme".to_string(),
        status: CallbackStatus::Success,
        phase: "Ready".to_string(),
        message: "orders-db provisioned".to_string(),
        error: None,
        time: Utc::now(),
        endpoint: Some("orders-db.tenant-acme.svc.local".to_string()),
        port: Some(5432),
        connection_secret: Some("orders-db-credentials".to_string()),
        additional_metadata: None,
        estimated_monthly_cost: Some(50.0),
    };
    let body = serde_json::to_vec(&callback).unwrap();
    let headers = signed_headers(&broker_key, &body);
    let response = handle_callback(State(api_state), headers, Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let resource: ManagedResource = store.get(Some("tenant-acme"), "orders-db").await.unwrap();
    assert_eq!(resource.status.phase, ResourcePhase::Ready);
    assert_eq!(
        resource.status.endpoint.as_deref(),
        Some("orders-db.tenant-acme.svc.local")
    );

    // Team deletion is blocked while the database exists.
    store.delete::<Team>(Some("tenant-acme"), "payments").await.unwrap();
    let blocked = team_reconciler
        .reconcile(&ReconcileRequest::new(Some("tenant-acme"), "payments"))
        .await;
    assert!(blocked.is_err());

    // Deleting the database deprovisions through the recorded broker,
    // then the team and tenant unwind cleanly.
    store
        .delete::<ManagedResource>(Some("tenant-acme"), "orders-db")
        .await
        .unwrap();
    settle(&resource_reconciler, Some("tenant-acme"), "orders-db").await;
    {
        let deprovisions = dispatcher.deprovisions.lock().unwrap();
        assert_eq!(deprovisions.len(), 1);
        assert_eq!(deprovisions[0].deployment_id, "d-orders-db");
    }
    assert!(
        store
            .get::<ManagedResource>(Some("tenant-acme"), "orders-db")
            .await
            .unwrap_err()
            .is_not_found()
    );

    settle(&team_reconciler, Some("tenant-acme"), "payments").await;
    assert!(
        store
            .get::<Team>(Some("tenant-acme"), "payments")
            .await
            .unwrap_err()
            .is_not_found()
    );

    store.delete::<Tenant>(None, "acme").await.unwrap();
    settle(&tenant_reconciler, None, "acme").await;
    assert!(
        store
            .get::<Tenant>(None, "acme")
            .await
            .unwrap_err()
            .is_not_found()
    );
}
