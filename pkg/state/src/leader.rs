use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use pkg_constants::state::{LEADER_LEASE_TTL_SECS, LEADER_RENEW_INTERVAL_DIVISOR};
use pkg_types::meta::{ObjectMeta, Record};

use crate::client::{Store, StoreExt};

const LEASE_NAME: &str = "controller-leader";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseSpec {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub renew_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// A store-persisted lease for leader election. Written through the
/// compare-and-swap path so two contenders cannot both acquire it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub metadata: ObjectMeta,
    pub spec: LeaseSpec,
}

impl Lease {
    pub fn is_expired(&self) -> bool {
        let expiry = self.spec.renew_at + chrono::Duration::seconds(self.spec.ttl_seconds as i64);
        Utc::now() > expiry
    }
}

impl Record for Lease {
    const KIND: &'static str = "Lease";
    const PLURAL: &'static str = "leases";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Leader election over a store-persisted lease.
///
/// Only one manager instance holds the lease at a time; that instance
/// runs the reconcilers while the others stay on standby.
pub struct LeaderElection<S: Store> {
    store: Arc<S>,
    server_id: String,
    ttl: Duration,
    renew_interval: Duration,
    leader_tx: watch::Sender<bool>,
    leader_rx: watch::Receiver<bool>,
}

impl<S: Store> LeaderElection<S> {
    pub fn new(store: Arc<S>, server_id: String) -> Self {
        let ttl = Duration::from_secs(LEADER_LEASE_TTL_SECS);
        let renew_interval =
            Duration::from_secs(LEADER_LEASE_TTL_SECS / LEADER_RENEW_INTERVAL_DIVISOR);
        let (leader_tx, leader_rx) = watch::channel(false);

        Self {
            store,
            server_id,
            ttl,
            renew_interval,
            leader_tx,
            leader_rx,
        }
    }

    /// Get a receiver to observe leadership changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_rx.clone()
    }

    /// Check if this instance is currently the leader.
    pub fn is_leader(&self) -> bool {
        *self.leader_rx.borrow()
    }

    fn fresh_lease(&self, now: DateTime<Utc>) -> Lease {
        Lease {
            metadata: ObjectMeta::new(LEASE_NAME),
            spec: LeaseSpec {
                holder_id: self.server_id.clone(),
                acquired_at: now,
                renew_at: now,
                ttl_seconds: self.ttl.as_secs(),
            },
        }
    }

    /// Try to acquire or renew the lease. Returns true if we are the leader.
    /// A compare-and-swap conflict means another contender wrote first;
    /// that is not an error, just "not leader this tick".
    async fn try_acquire_or_renew(&self) -> anyhow::Result<bool> {
        let now = Utc::now();

        let current: Lease = match self.store.get(None, LEASE_NAME).await {
            Ok(lease) => lease,
            Err(e) if e.is_not_found() => {
                info!("No existing lease found, acquiring for {}", self.server_id);
                return match self.store.create(&self.fresh_lease(now)).await {
                    Ok(_) => Ok(true),
                    Err(crate::error::StoreError::AlreadyExists { .. }) => Ok(false),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        if current.spec.holder_id == self.server_id {
            // We hold it — renew
            let mut renewed = current;
            renewed.spec.renew_at = now;
            return match self.store.update(&renewed).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_conflict() => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        if current.is_expired() {
            // Previous holder's lease expired — take over
            info!(
                "Lease expired (held by {}), acquiring for {}",
                current.spec.holder_id, self.server_id
            );
            let mut taken = current;
            taken.spec.holder_id = self.server_id.clone();
            taken.spec.acquired_at = now;
            taken.spec.renew_at = now;
            return match self.store.update(&taken).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_conflict() => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        Ok(false)
    }

    /// Start the leader election loop as a background task.
    pub fn start(self) -> (tokio::task::JoinHandle<()>, watch::Receiver<bool>) {
        let rx = self.leader_rx.clone();
        let handle = tokio::spawn(async move {
            info!(
                "LeaderElection started (server_id={}, ttl={}s, renew={}s)",
                self.server_id,
                self.ttl.as_secs(),
                self.renew_interval.as_secs()
            );

            let mut interval = tokio::time::interval(self.renew_interval);
            loop {
                interval.tick().await;

                match self.try_acquire_or_renew().await {
                    Ok(is_leader) => {
                        let was_leader = *self.leader_rx.borrow();
                        if is_leader && !was_leader {
                            info!("This instance is now the leader ({})", self.server_id);
                        } else if !is_leader && was_leader {
                            warn!(
                                "Leadership lost for {} — another instance took over",
                                self.server_id
                            );
                        }
                        let _ = self.leader_tx.send(is_leader);
                    }
                    Err(e) => {
                        warn!("Leader election error: {}", e);
                        let _ = self.leader_tx.send(false);
                    }
                }
            }
        });

        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_first_contender_acquires() {
        let store = Arc::new(MemoryStore::new());
        let election = LeaderElection::new(store, "manager-a".to_string());
        assert!(election.try_acquire_or_renew().await.unwrap());
        // Renewal keeps leadership.
        assert!(election.try_acquire_or_renew().await.unwrap());
    }

    #[tokio::test]
    async fn test_second_contender_waits() {
        let store = Arc::new(MemoryStore::new());
        let a = LeaderElection::new(store.clone(), "manager-a".to_string());
        let b = LeaderElection::new(store, "manager-b".to_string());
        assert!(a.try_acquire_or_renew().await.unwrap());
        assert!(!b.try_acquire_or_renew().await.unwrap());
    }
}
