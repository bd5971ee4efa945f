use chrono::Utc;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use pkg_state::{Store, StoreExt};
use pkg_types::event::{Event, EventType, InvolvedObject};
use pkg_types::meta::{ObjectMeta, Record};

/// Best-effort recorder of user-visible events attached to records.
/// Failures are logged and swallowed; events never block reconciles.
pub struct EventRecorder<S: Store> {
    store: Arc<S>,
}

impl<S: Store> EventRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn normal<R: Record>(&self, involved: &R, reason: &str, message: String) {
        self.record(involved, EventType::Normal, reason, message).await;
    }

    pub async fn warning<R: Record>(&self, involved: &R, reason: &str, message: String) {
        self.record(involved, EventType::Warning, reason, message).await;
    }

    async fn record<R: Record>(
        &self,
        involved: &R,
        event_type: EventType,
        reason: &str,
        message: String,
    ) {
        // Events for cluster-scoped records land in "default".
        let namespace = involved.namespace().unwrap_or("default").to_string();
        let name = format!(
            "{}.{}",
            involved.name(),
            Uuid::new_v4().simple().to_string().get(..10).unwrap_or("0")
        );
        let event = Event {
            metadata: ObjectMeta::namespaced(namespace, name),
            involved_object: InvolvedObject {
                kind: R::KIND.to_string(),
                name: involved.name().to_string(),
                namespace: involved.namespace().map(str::to_string),
            },
            event_type,
            reason: reason.to_string(),
            message,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.create(&event).await {
            warn!(
                "Failed to record {} event for {} {}: {}",
                reason,
                R::KIND,
                involved.name(),
                e
            );
        }
    }
}

impl<S: Store> Clone for EventRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::MemoryStore;
    use pkg_types::namespace::Namespace;

    #[tokio::test]
    async fn test_events_are_best_effort_records() {
        let store = Arc::new(MemoryStore::new());
        let recorder = EventRecorder::new(store.clone());
        let ns = Namespace::new("dev");

        recorder
            .warning(&ns, "TenantUnresolved", "tenant could not be resolved".to_string())
            .await;

        let events: Vec<Event> = store.list(Some("default")).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "TenantUnresolved");
        assert_eq!(events[0].involved_object.kind, "Namespace");
    }
}
