//! Broker registry: a cached view of known brokers with
//! capability-aware selection.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

use pkg_constants::dispatch::{
    HEARTBEAT_FRESH_SECS, HEARTBEAT_RECENT_SECS, REGISTRY_CACHE_TTL_SECS,
};
use pkg_state::{Store, StoreExt, StoreError};
use pkg_types::broker::{Broker, BrokerPhase, CloudProvider};

/// Requirements for broker selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    /// Record kind the broker must be able to provision.
    pub resource_kind: String,
    pub cloud_provider: Option<CloudProvider>,
    pub region: Option<String>,
    /// Specific implementation, e.g. "postgresql".
    pub provider: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(
        "no broker found matching criteria: resourceKind={resource_kind}, cloudProvider={cloud_provider}, region={region}, provider={provider}"
    )]
    NoBrokerAvailable {
        resource_kind: String,
        cloud_provider: String,
        region: String,
        provider: String,
    },

    #[error("failed to refresh broker cache: {0}")]
    Refresh(#[from] StoreError),
}

impl RegistryError {
    fn no_broker(criteria: &SelectionCriteria) -> Self {
        RegistryError::NoBrokerAvailable {
            resource_kind: criteria.resource_kind.clone(),
            cloud_provider: criteria
                .cloud_provider
                .map(|p| p.to_string())
                .unwrap_or_default(),
            region: criteria.region.clone().unwrap_or_default(),
            provider: criteria.provider.clone().unwrap_or_default(),
        }
    }
}

/// Cached map of known brokers, refreshed from the store when stale.
///
/// The cache trades a bounded staleness window (30s) for reduced store
/// load; the health prober keeps phase and heartbeat current on the
/// underlying records independently.
pub struct Registry<S: Store> {
    store: Arc<S>,
    cache: RwLock<HashMap<String, Broker>>,
    last_refresh: RwLock<Option<Instant>>,
    cache_ttl: Duration,
}

impl<S: Store> Registry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
            cache_ttl: Duration::from_secs(REGISTRY_CACHE_TTL_SECS),
        }
    }

    /// Replace the cache with a full listing of all brokers.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let brokers: Vec<Broker> = self.store.list(None).await?;

        let mut cache = self.cache.write().await;
        cache.clear();
        for broker in brokers {
            let key = format!(
                "{}/{}",
                broker.metadata.namespace.as_deref().unwrap_or_default(),
                broker.metadata.name
            );
            cache.insert(key, broker);
        }
        info!("Refreshed broker cache ({} brokers)", cache.len());
        pkg_metrics::global().gauge_set(pkg_metrics::BROKERS_KNOWN, cache.len() as i64);
        drop(cache);

        *self.last_refresh.write().await = Some(Instant::now());
        Ok(())
    }

    /// Refresh only if the cache is older than its TTL.
    pub async fn refresh_if_stale(&self) -> Result<(), RegistryError> {
        let needs_refresh = match *self.last_refresh.read().await {
            Some(at) => at.elapsed() > self.cache_ttl,
            None => true,
        };
        if needs_refresh {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Choose the best matching broker for the criteria.
    pub async fn select(&self, criteria: &SelectionCriteria) -> Result<Broker, RegistryError> {
        self.refresh_if_stale().await?;

        let cache = self.cache.read().await;
        let mut best: Option<(&Broker, f64)> = None;
        for broker in cache.values() {
            if !matches_criteria(broker, criteria) {
                continue;
            }
            let score = score_broker(broker);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((broker, score)),
            }
        }

        match best {
            Some((broker, score)) => {
                info!(
                    "Selected broker {} (endpoint={}, score={})",
                    broker.metadata.name, broker.spec.endpoint, score
                );
                Ok(broker.clone())
            }
            None => Err(RegistryError::no_broker(criteria)),
        }
    }

    /// All cached brokers, refreshing first if stale.
    pub async fn list_brokers(&self) -> Result<Vec<Broker>, RegistryError> {
        self.refresh_if_stale().await?;
        Ok(self.cache.read().await.values().cloned().collect())
    }
}

/// All filter rules must hold for a broker to be a candidate.
fn matches_criteria(broker: &Broker, criteria: &SelectionCriteria) -> bool {
    // Only consider healthy brokers
    if broker.status.phase != BrokerPhase::Ready {
        return false;
    }

    if let Some(cloud) = criteria.cloud_provider {
        if broker.spec.cloud_provider != cloud {
            return false;
        }
    }

    // Region only filters when both sides declare one.
    if let (Some(wanted), Some(region)) = (criteria.region.as_deref(), broker.spec.region.as_deref())
    {
        if wanted != region {
            return false;
        }
    }

    if !criteria.resource_kind.is_empty() {
        let capable = broker.spec.capabilities.iter().any(|cap| {
            if cap.resource_kind != criteria.resource_kind {
                return false;
            }
            match criteria.provider.as_deref() {
                Some(provider) => cap.providers.iter().any(|p| p == provider),
                None => true,
            }
        });
        if !capable {
            return false;
        }
    }

    // Check if broker is at capacity
    if broker.spec.max_concurrent_deployments > 0
        && broker.status.active_deployments >= broker.spec.max_concurrent_deployments
    {
        return false;
    }

    true
}

/// Additive score: priority, idle capacity, heartbeat recency.
fn score_broker(broker: &Broker) -> f64 {
    let mut score = f64::from(broker.spec.priority);

    if broker.spec.max_concurrent_deployments > 0 {
        let load = f64::from(broker.status.active_deployments)
            / f64::from(broker.spec.max_concurrent_deployments);
        score += (1.0 - load) * 100.0;
    }

    if let Some(heartbeat) = broker.status.last_heartbeat {
        let age = Utc::now().signed_duration_since(heartbeat).num_seconds();
        if age < HEARTBEAT_FRESH_SECS {
            score += 50.0;
        } else if age < HEARTBEAT_RECENT_SECS {
            score += 25.0;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::MemoryStore;
    use pkg_types::broker::{BrokerSpec, BrokerStatus, Capability, HealthCheckConfig};
    use pkg_types::meta::ObjectMeta;

    fn make_broker(name: &str, providers: &[&str]) -> Broker {
        Broker {
            metadata: ObjectMeta::namespaced("default", name),
            spec: BrokerSpec {
                endpoint: format!("http://{}.example:8080", name),
                cloud_provider: CloudProvider::Aws,
                region: None,
                capabilities: vec![Capability {
                    resource_kind: "ManagedResource".to_string(),
                    providers: providers.iter().map(|p| p.to_string()).collect(),
                    regions: vec![],
                }],
                health_check: Some(HealthCheckConfig::default()),
                priority: 100,
                max_concurrent_deployments: 10,
            },
            status: BrokerStatus {
                phase: BrokerPhase::Ready,
                ..Default::default()
            },
        }
    }

    fn criteria(provider: &str) -> SelectionCriteria {
        SelectionCriteria {
            resource_kind: "ManagedResource".to_string(),
            provider: Some(provider.to_string()),
            ..Default::default()
        }
    }

    async fn registry_with(brokers: Vec<Broker>) -> Registry<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for broker in &brokers {
            store.create(broker).await.unwrap();
        }
        Registry::new(store)
    }

    #[tokio::test]
    async fn test_select_filters_by_capability_provider() {
        let registry = registry_with(vec![
            make_broker("b1", &["postgresql"]),
            make_broker("b2", &["mysql"]),
        ])
        .await;

        let selected = registry.select(&criteria("postgresql")).await.unwrap();
        assert_eq!(selected.metadata.name, "b1");
    }

    #[tokio::test]
    async fn test_select_skips_not_ready() {
        let mut unhealthy = make_broker("b1", &["postgresql"]);
        unhealthy.status.phase = BrokerPhase::Unhealthy;
        let registry =
            registry_with(vec![unhealthy, make_broker("b2", &["postgresql"])]).await;

        let selected = registry.select(&criteria("postgresql")).await.unwrap();
        assert_eq!(selected.metadata.name, "b2");
    }

    #[tokio::test]
    async fn test_select_prefers_higher_priority() {
        let mut low = make_broker("low", &["postgresql"]);
        low.spec.priority = 100;
        let mut high = make_broker("high", &["postgresql"]);
        high.spec.priority = 200;

        let registry = registry_with(vec![low, high]).await;
        let selected = registry.select(&criteria("postgresql")).await.unwrap();
        assert_eq!(selected.metadata.name, "high");
    }

    #[tokio::test]
    async fn test_select_skips_brokers_at_capacity() {
        let mut full = make_broker("full", &["postgresql"]);
        full.status.active_deployments = 10;
        let mut idle = make_broker("idle", &["postgresql"]);
        idle.spec.priority = 1; // even a low-priority broker beats a full one

        let registry = registry_with(vec![full, idle]).await;
        let selected = registry.select(&criteria("postgresql")).await.unwrap();
        assert_eq!(selected.metadata.name, "idle");
    }

    #[tokio::test]
    async fn test_fresh_heartbeat_breaks_priority_tie() {
        let stale = make_broker("stale", &["postgresql"]);
        let mut fresh = make_broker("fresh", &["postgresql"]);
        fresh.status.last_heartbeat = Some(Utc::now());

        let registry = registry_with(vec![stale, fresh]).await;
        let selected = registry.select(&criteria("postgresql")).await.unwrap();
        assert_eq!(selected.metadata.name, "fresh");
    }

    #[tokio::test]
    async fn test_region_filter_only_when_both_set() {
        let mut east = make_broker("east", &["postgresql"]);
        east.spec.region = Some("eastus".to_string());
        let anywhere = make_broker("anywhere", &["postgresql"]);

        let registry = registry_with(vec![east, anywhere]).await;
        let mut want_west = criteria("postgresql");
        want_west.region = Some("westus".to_string());

        // "east" is filtered out; "anywhere" declares no region and stays.
        let selected = registry.select(&want_west).await.unwrap();
        assert_eq!(selected.metadata.name, "anywhere");
    }

    #[tokio::test]
    async fn test_no_candidates_echoes_criteria() {
        let registry = registry_with(vec![make_broker("b1", &["mysql"])]).await;
        let err = registry.select(&criteria("postgresql")).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("postgresql"));
        assert!(message.contains("ManagedResource"));
    }
}
