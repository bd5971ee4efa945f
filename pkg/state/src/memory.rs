use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};

use pkg_constants::state::WATCH_BUFFER_EVENTS;
use pkg_types::meta::KindSpec;

use crate::client::Store;
use crate::error::StoreError;
use crate::mutate::{self, DeleteOutcome, UpdateOutcome};
use crate::watch::{EventLog, WatchEvent, WatchOp};

/// In-memory store with the same semantics as the persistent backend.
///
/// Used by tests; `fail_status_updates` makes `update_status` report
/// unsupported so the full-update fallback path can be exercised.
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Value>>,
    event_log: EventLog,
    status_unsupported: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            event_log: EventLog::new(WATCH_BUFFER_EVENTS),
            status_unsupported: AtomicBool::new(false),
        }
    }

    /// Make `update_status` fail with `StatusUnsupported`.
    pub fn fail_status_updates(&self, fail: bool) {
        self.status_unsupported.store(fail, Ordering::SeqCst);
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    fn lookup_key(kind: KindSpec, namespace: Option<&str>, name: &str) -> Result<String, StoreError> {
        if kind.namespaced && namespace.is_none() {
            return Err(StoreError::Malformed(format!(
                "{} is namespaced but no namespace was given",
                kind.kind
            )));
        }
        Ok(kind.key(namespace, name))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        let key = Self::lookup_key(kind, namespace, name)?;
        let records = self.records.read().await;
        records
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))
    }

    async fn list_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let prefix = match namespace {
            Some(ns) if kind.namespaced => kind.namespace_prefix(ns),
            _ => kind.prefix(),
        };
        let records = self.records.read().await;
        Ok(records
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError> {
        let (key, record) = mutate::prepare_create(kind, record)?;
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind.kind,
                key,
            });
        }
        records.insert(key, record.clone());
        drop(records);
        let meta = mutate::read_meta(&record)?;
        self.event_log
            .emit(WatchOp::Added, kind.kind, meta.namespace.as_deref(), &meta.name, record.clone())
            .await;
        Ok(record)
    }

    async fn update_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError> {
        let key = mutate::key_of(kind, &record)?;
        let mut records = self.records.write().await;
        let current = records.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: kind.kind,
            key: key.clone(),
        })?;
        let (op, stored) = match mutate::prepare_update(kind, current, record)? {
            UpdateOutcome::Write(v) => {
                records.insert(key, v.clone());
                (WatchOp::Modified, v)
            }
            UpdateOutcome::Remove(v) => {
                records.remove(&key);
                (WatchOp::Deleted, v)
            }
        };
        drop(records);
        let meta = mutate::read_meta(&stored)?;
        self.event_log
            .emit(op, kind.kind, meta.namespace.as_deref(), &meta.name, stored.clone())
            .await;
        Ok(stored)
    }

    async fn update_status_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError> {
        if self.status_unsupported.load(Ordering::SeqCst) {
            return Err(StoreError::StatusUnsupported);
        }
        let key = mutate::key_of(kind, &record)?;
        let mut records = self.records.write().await;
        let current = records.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: kind.kind,
            key: key.clone(),
        })?;
        let stored = mutate::prepare_update_status(kind, current, record)?;
        records.insert(key, stored.clone());
        drop(records);
        let meta = mutate::read_meta(&stored)?;
        self.event_log
            .emit(
                WatchOp::Modified,
                kind.kind,
                meta.namespace.as_deref(),
                &meta.name,
                stored.clone(),
            )
            .await;
        Ok(stored)
    }

    async fn delete_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let key = Self::lookup_key(kind, namespace, name)?;
        let mut records = self.records.write().await;
        let current = records
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))?;
        match mutate::prepare_delete(&current)? {
            DeleteOutcome::Remove => {
                records.remove(&key);
                drop(records);
                self.event_log
                    .emit(WatchOp::Deleted, kind.kind, namespace, name, current)
                    .await;
            }
            DeleteOutcome::Tombstone(tombstone) => {
                records.insert(key, tombstone.clone());
                drop(records);
                self.event_log
                    .emit(WatchOp::Modified, kind.kind, namespace, name, tombstone)
                    .await;
            }
            DeleteOutcome::AlreadyDeleting => {}
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.event_log.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StoreExt;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::tenant::{Tenant, TenantSpec, TenantStatus};

    fn make_tenant(name: &str) -> Tenant {
        Tenant {
            metadata: ObjectMeta::new(name),
            spec: TenantSpec {
                display_name: name.to_string(),
                ..Default::default()
            },
            status: TenantStatus::default(),
        }
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let store = MemoryStore::new();
        let created = store.create(&make_tenant("acme")).await.unwrap();
        assert_eq!(created.metadata.resource_version, 1);
        assert_eq!(created.metadata.generation, 1);
        assert!(!created.metadata.uid.is_empty());

        let fetched: Tenant = store.get(None, "acme").await.unwrap();
        assert_eq!(fetched.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&make_tenant("acme")).await.unwrap();

        let mut first = created.clone();
        first.spec.description = Some("first".to_string());
        store.update(&first).await.unwrap();

        // Second writer still holds the original revision.
        let mut second = created;
        second.spec.description = Some("second".to_string());
        let err = store.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_generation_bumps_on_spec_change_only() {
        let store = MemoryStore::new();
        let created = store.create(&make_tenant("acme")).await.unwrap();

        let mut status_only = created.clone();
        status_only.status.current_spend = 12.5;
        let updated = store.update_status(&status_only).await.unwrap();
        assert_eq!(updated.metadata.generation, 1);
        assert_eq!(updated.metadata.resource_version, 2);

        let mut spec_change = updated.clone();
        spec_change.spec.description = Some("changed".to_string());
        let updated = store.update(&spec_change).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);
    }

    #[tokio::test]
    async fn test_delete_honors_barriers() {
        let store = MemoryStore::new();
        let mut tenant = make_tenant("acme");
        tenant.metadata.add_barrier("stratus.io/tenant-cleanup");
        let created = store.create(&tenant).await.unwrap();

        store.delete::<Tenant>(None, "acme").await.unwrap();
        let tombstoned: Tenant = store.get(None, "acme").await.unwrap();
        assert!(tombstoned.metadata.is_deleting());

        // Stripping the barrier removes the record.
        let mut stripped = tombstoned;
        stripped.metadata.remove_barrier("stratus.io/tenant-cleanup");
        store.update(&stripped).await.unwrap();
        assert!(store.get::<Tenant>(None, "acme").await.unwrap_err().is_not_found());

        // No barriers on a fresh record: delete removes immediately.
        store.create(&make_tenant("beta")).await.unwrap();
        store.delete::<Tenant>(None, "beta").await.unwrap();
        assert!(store.get::<Tenant>(None, "beta").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_status_unsupported_toggle() {
        let store = MemoryStore::new();
        let created = store.create(&make_tenant("acme")).await.unwrap();
        store.fail_status_updates(true);
        let err = store.update_status(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::StatusUnsupported));
    }

    #[tokio::test]
    async fn test_watch_events_emitted() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.create(&make_tenant("acme")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.op, WatchOp::Added);
        assert_eq!(event.kind, "Tenant");
        assert_eq!(event.name, "acme");
    }
}
