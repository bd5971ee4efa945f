use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use slatedb::db::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::info;

use pkg_constants::state::WATCH_BUFFER_EVENTS;
use pkg_types::meta::KindSpec;

use crate::client::Store;
use crate::error::StoreError;
use crate::mutate::{self, DeleteOutcome, UpdateOutcome};
use crate::watch::{EventLog, WatchEvent, WatchOp};

/// Persistent record store backed by SlateDB on a local filesystem.
///
/// All read-modify-write operations are serialized through an internal
/// lock; combined with leader election this makes the resource-version
/// compare-and-swap sound without backend transactions.
#[derive(Clone)]
pub struct SlateStore {
    db: Arc<Db>,
    write_lock: Arc<Mutex<()>>,
    event_log: EventLog,
}

impl SlateStore {
    /// Open (or create) a store rooted at `path` on the local filesystem.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB record store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Arc::new(
            Db::open(Path::from("/"), object_store)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?,
        );

        Ok(Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
            event_log: EventLog::new(WATCH_BUFFER_EVENTS),
        })
    }

    /// Gracefully close the store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB record store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }

    async fn read_key(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let bytes = self
            .db
            .get(key.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("SlateDB get failed: {}", e)))?;
        match bytes {
            Some(b) => Ok(Some(serde_json::from_slice(&b)?)),
            None => Ok(None),
        }
    }

    async fn write_key(&self, key: &str, record: &Value) -> Result<(), StoreError> {
        let data = serde_json::to_vec(record)?;
        self.db
            .put(key.as_bytes(), &data)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("SlateDB put failed: {}", e)))
    }

    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("SlateDB delete failed: {}", e)))
    }

    async fn emit(&self, op: WatchOp, kind: KindSpec, record: &Value) -> Result<(), StoreError> {
        let meta = mutate::read_meta(record)?;
        self.event_log
            .emit(op, kind.kind, meta.namespace.as_deref(), &meta.name, record.clone())
            .await;
        Ok(())
    }
}

#[async_trait]
impl Store for SlateStore {
    async fn get_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        if kind.namespaced && namespace.is_none() {
            return Err(StoreError::Malformed(format!(
                "{} is namespaced but no namespace was given",
                kind.kind
            )));
        }
        let key = kind.key(namespace, name);
        self.read_key(&key)
            .await?
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
        let mut results = Vec::new();
        let prefix_bytes = Bytes::copy_from_slice(prefix.as_bytes());
        let mut iter = self
            .db
            .scan(prefix_bytes.clone()..)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("SlateDB scan failed: {}", e)))?;

        while let Ok(Some(kv)) = iter.next().await {
            if !kv.key.starts_with(prefix_bytes.as_ref()) {
                break;
            }
            results.push(serde_json::from_slice(&kv.value)?);
        }
        Ok(results)
    }

    async fn create_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError> {
        let _guard = self.write_lock.lock().await;
        let (key, record) = mutate::prepare_create(kind, record)?;
        if self.read_key(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: kind.kind,
                key,
            });
        }
        self.write_key(&key, &record).await?;
        self.emit(WatchOp::Added, kind, &record).await?;
        Ok(record)
    }

    async fn update_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = mutate::key_of(kind, &record)?;
        let current = self.read_key(&key).await?.ok_or_else(|| StoreError::NotFound {
            kind: kind.kind,
            key: key.clone(),
        })?;
        match mutate::prepare_update(kind, &current, record)? {
            UpdateOutcome::Write(stored) => {
                self.write_key(&key, &stored).await?;
                self.emit(WatchOp::Modified, kind, &stored).await?;
                Ok(stored)
            }
            UpdateOutcome::Remove(stored) => {
                self.remove_key(&key).await?;
                self.emit(WatchOp::Deleted, kind, &stored).await?;
                Ok(stored)
            }
        }
    }

    async fn update_status_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = mutate::key_of(kind, &record)?;
        let current = self.read_key(&key).await?.ok_or_else(|| StoreError::NotFound {
            kind: kind.kind,
            key: key.clone(),
        })?;
        let stored = mutate::prepare_update_status(kind, &current, record)?;
        self.write_key(&key, &stored).await?;
        self.emit(WatchOp::Modified, kind, &stored).await?;
        Ok(stored)
    }

    async fn delete_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = kind.key(namespace, name);
        let current = self
            .read_key(&key)
            .await?
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))?;
        match mutate::prepare_delete(&current)? {
            DeleteOutcome::Remove => {
                self.remove_key(&key).await?;
                self.emit(WatchOp::Deleted, kind, &current).await?;
            }
            DeleteOutcome::Tombstone(tombstone) => {
                self.write_key(&key, &tombstone).await?;
                self.emit(WatchOp::Modified, kind, &tombstone).await?;
            }
            DeleteOutcome::AlreadyDeleting => {}
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.event_log.subscribe()
    }
}
