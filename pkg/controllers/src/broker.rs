use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use pkg_manager::{ReconcileAction, ReconcileRequest, Reconciler};
use pkg_state::{Store, StoreExt};
use pkg_types::broker::{Broker, BrokerPhase};
use pkg_types::condition::{Condition, ConditionStatus, set_condition};
use pkg_types::meta::{KindSpec, Record};

use crate::status::update_status_with_fallback;

/// Probes each broker's health endpoint on its configured cadence and
/// keeps phase, heartbeat and the Ready condition current. Unhealthy
/// flips are debounced through the broker's failure threshold.
pub struct BrokerHealthReconciler<S: Store> {
    store: Arc<S>,
    client: reqwest::Client,
}

impl<S: Store> BrokerHealthReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("stratus-manager/0.1.0")
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { store, client }
    }

    /// One probe: 2xx is healthy, anything else carries the status
    /// code or transport error class in the message.
    async fn check_health(&self, broker: &Broker) -> (bool, String) {
        let url = broker.health_url();
        let timeout = Duration::from_secs(u64::from(broker.health_timeout_seconds()));

        let response = match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return (false, format!("health check failed: {}", e)),
        };

        if response.status().is_success() {
            (true, "health check passed".to_string())
        } else {
            (
                false,
                format!("health check returned status {}", response.status()),
            )
        }
    }
}

#[async_trait]
impl<S: Store> Reconciler for BrokerHealthReconciler<S> {
    fn kind(&self) -> KindSpec {
        Broker::kind_spec()
    }

    async fn reconcile(&self, request: &ReconcileRequest) -> anyhow::Result<ReconcileAction> {
        let broker: Broker = match self
            .store
            .get(request.namespace.as_deref(), &request.name)
            .await
        {
            Ok(b) => b,
            Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
            Err(e) => return Err(e.into()),
        };

        if broker.metadata.is_deleting() {
            // Brokers hold no cloud state of their own; nothing to tear down.
            return Ok(ReconcileAction::Done);
        }

        let (healthy, message) = self.check_health(&broker).await;
        debug!(
            "Probed broker {}: healthy={}, {}",
            broker.metadata.name, healthy, message
        );

        let mut broker = broker;
        let generation = broker.metadata.generation;
        if healthy {
            let was = broker.status.phase;
            broker.status.phase = BrokerPhase::Ready;
            broker.status.last_heartbeat = Some(Utc::now());
            broker.status.message = Some("broker is healthy and operational".to_string());
            broker.status.consecutive_failures = 0;
            let mut condition =
                Condition::new("Ready", ConditionStatus::True, "BrokerHealthy", message.as_str());
            condition.observed_generation = generation;
            set_condition(&mut broker.status.conditions, condition);
            if was != BrokerPhase::Ready {
                info!("Broker {} is Ready", broker.metadata.name);
            }
        } else {
            broker.status.consecutive_failures = broker.status.consecutive_failures.saturating_add(1);
            broker.status.message = Some(message.clone());
            let mut condition = Condition::new(
                "Ready",
                ConditionStatus::False,
                "BrokerUnhealthy",
                message.as_str(),
            );
            condition.observed_generation = generation;
            set_condition(&mut broker.status.conditions, condition);
            if broker.status.consecutive_failures >= broker.failure_threshold() {
                if broker.status.phase != BrokerPhase::Unhealthy {
                    info!(
                        "Broker {} is Unhealthy after {} consecutive failures: {}",
                        broker.metadata.name, broker.status.consecutive_failures, message
                    );
                }
                broker.status.phase = BrokerPhase::Unhealthy;
            }
        }
        broker.status.observed_generation = generation;

        update_status_with_fallback(self.store.as_ref(), &broker).await?;

        let interval = Duration::from_secs(u64::from(broker.health_interval_seconds()));
        Ok(ReconcileAction::RequeueAfter(interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use pkg_state::MemoryStore;
    use pkg_types::broker::{BrokerSpec, BrokerStatus, Capability, CloudProvider, HealthCheckConfig};
    use pkg_types::condition::find_condition;
    use pkg_types::meta::ObjectMeta;

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route(
            "/health",
            get(move || async move { (status, "{\"status\":\"healthy\"}") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn make_broker(endpoint: &str, failure_threshold: u32) -> Broker {
        Broker {
            metadata: ObjectMeta::namespaced("default", "b1"),
            spec: BrokerSpec {
                endpoint: endpoint.to_string(),
                cloud_provider: CloudProvider::OnPrem,
                region: None,
                capabilities: vec![Capability {
                    resource_kind: "ManagedResource".to_string(),
                    providers: vec!["postgresql".to_string()],
                    regions: vec![],
                }],
                health_check: Some(HealthCheckConfig {
                    endpoint: None,
                    interval_seconds: 30,
                    timeout_seconds: 2,
                    failure_threshold,
                }),
                priority: 100,
                max_concurrent_deployments: 10,
            },
            status: BrokerStatus::default(),
        }
    }

    #[tokio::test]
    async fn test_healthy_probe_marks_ready() {
        let endpoint = serve(StatusCode::OK).await;
        let store = Arc::new(MemoryStore::new());
        store.create(&make_broker(&endpoint, 3)).await.unwrap();

        let reconciler = BrokerHealthReconciler::new(store.clone());
        let action = reconciler
            .reconcile(&ReconcileRequest::new(Some("default"), "b1"))
            .await
            .unwrap();
        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::from_secs(30)));

        let broker: Broker = store.get(Some("default"), "b1").await.unwrap();
        assert_eq!(broker.status.phase, BrokerPhase::Ready);
        assert!(broker.status.last_heartbeat.is_some());
        assert_eq!(broker.status.observed_generation, broker.metadata.generation);
        let ready = find_condition(&broker.status.conditions, "Ready").unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "BrokerHealthy");
    }

    #[tokio::test]
    async fn test_failures_debounced_until_threshold() {
        let endpoint = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let store = Arc::new(MemoryStore::new());
        store.create(&make_broker(&endpoint, 2)).await.unwrap();

        let reconciler = BrokerHealthReconciler::new(store.clone());
        let request = ReconcileRequest::new(Some("default"), "b1");

        reconciler.reconcile(&request).await.unwrap();
        let broker: Broker = store.get(Some("default"), "b1").await.unwrap();
        // First failure: condition flips but the phase is debounced.
        assert_eq!(broker.status.phase, BrokerPhase::Pending);
        assert_eq!(broker.status.consecutive_failures, 1);
        let ready = find_condition(&broker.status.conditions, "Ready").unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "BrokerUnhealthy");

        reconciler.reconcile(&request).await.unwrap();
        let broker: Broker = store.get(Some("default"), "b1").await.unwrap();
        assert_eq!(broker.status.phase, BrokerPhase::Unhealthy);
        assert!(broker.status.message.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_transport_error_message_class() {
        // Nothing listens here.
        let store = Arc::new(MemoryStore::new());
        store
            .create(&make_broker("http://127.0.0.1:1", 1))
            .await
            .unwrap();

        let reconciler = BrokerHealthReconciler::new(store.clone());
        reconciler
            .reconcile(&ReconcileRequest::new(Some("default"), "b1"))
            .await
            .unwrap();

        let broker: Broker = store.get(Some("default"), "b1").await.unwrap();
        assert_eq!(broker.status.phase, BrokerPhase::Unhealthy);
        assert!(broker.status.message.unwrap().contains("health check failed"));
    }

    #[tokio::test]
    async fn test_recovery_resets_failure_count() {
        let endpoint = serve(StatusCode::OK).await;
        let store = Arc::new(MemoryStore::new());
        let mut broker = make_broker(&endpoint, 3);
        broker.status.phase = BrokerPhase::Unhealthy;
        broker.status.consecutive_failures = 5;
        store.create(&broker).await.unwrap();

        let reconciler = BrokerHealthReconciler::new(store.clone());
        reconciler
            .reconcile(&ReconcileRequest::new(Some("default"), "b1"))
            .await
            .unwrap();

        let broker: Broker = store.get(Some("default"), "b1").await.unwrap();
        assert_eq!(broker.status.phase, BrokerPhase::Ready);
        assert_eq!(broker.status.consecutive_failures, 0);
    }
}
