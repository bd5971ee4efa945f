use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use pkg_types::meta::{KindSpec, Record};

use crate::error::StoreError;
use crate::watch::WatchEvent;

/// The object store consumed by the control plane: typed get / list /
/// watch / update / status-update with resource-version semantics.
///
/// Implementations persist records as JSON values keyed by
/// `/registry/<plural>/[<namespace>/]<name>` and emit a watch event for
/// every mutation. `update` and `update_status` are compare-and-swap:
/// a stale `resource_version` fails with [`StoreError::Conflict`].
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError>;

    /// List records of a kind. `namespace` narrows a namespaced kind to
    /// one namespace; `None` lists across all namespaces.
    async fn list_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn create_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError>;

    async fn update_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError>;

    /// Update only the status sub-object. May fail with
    /// [`StoreError::StatusUnsupported`] on test substrates, in which
    /// case callers fall back to a full update.
    async fn update_status_value(&self, kind: KindSpec, record: Value) -> Result<Value, StoreError>;

    /// Delete a record. With removal-barriers attached this stamps the
    /// deletion timestamp instead; the record is removed once the last
    /// barrier is stripped by an update.
    async fn delete_value(
        &self,
        kind: KindSpec,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Subscribe to the mutation stream for all kinds.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Typed convenience layer over [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get<R: Record>(&self, namespace: Option<&str>, name: &str) -> Result<R, StoreError> {
        let value = self.get_value(R::kind_spec(), namespace, name).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list<R: Record>(&self, namespace: Option<&str>) -> Result<Vec<R>, StoreError> {
        let values = self.list_value(R::kind_spec(), namespace).await?;
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            records.push(serde_json::from_value(value)?);
        }
        Ok(records)
    }

    async fn create<R: Record>(&self, record: &R) -> Result<R, StoreError> {
        let value = self
            .create_value(R::kind_spec(), serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn update<R: Record>(&self, record: &R) -> Result<R, StoreError> {
        let value = self
            .update_value(R::kind_spec(), serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<R: Record>(&self, record: &R) -> Result<R, StoreError> {
        let value = self
            .update_status_value(R::kind_spec(), serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<R: Record>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.delete_value(R::kind_spec(), namespace, name).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
