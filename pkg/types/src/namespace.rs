use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Record};

/// Cluster-scoped grouping for namespaced records. Tenant-owned
/// namespaces carry the tenant label used by the resolver fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
        }
    }
}

impl Record for Namespace {
    const KIND: &'static str = "Namespace";
    const PLURAL: &'static str = "namespaces";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
