use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Common metadata envelope shared by every persisted record.
///
/// `resource_version`, `generation`, and `uid` are store-assigned;
/// callers never set them directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Removal-barriers: string tags that block store-level deletion
    /// until stripped by the reconciler that added them.
    #[serde(default)]
    pub barriers: Vec<String>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            creation_timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// Metadata for a namespaced record.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(name)
        }
    }

    /// True once the store has stamped a deletion timestamp.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_barrier(&self, tag: &str) -> bool {
        self.barriers.iter().any(|b| b == tag)
    }

    /// Add a barrier tag if not already present. Returns true if added.
    pub fn add_barrier(&mut self, tag: &str) -> bool {
        if self.has_barrier(tag) {
            return false;
        }
        self.barriers.push(tag.to_string());
        true
    }

    /// Remove a barrier tag. Returns true if it was present.
    pub fn remove_barrier(&mut self, tag: &str) -> bool {
        let before = self.barriers.len();
        self.barriers.retain(|b| b != tag);
        self.barriers.len() != before
    }
}

/// Machine-readable description of a record kind: its kind tag, the
/// plural path segment under `/registry/`, and whether it is namespaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl KindSpec {
    /// Store key prefix for this kind, e.g. `/registry/tenants/`.
    pub fn prefix(&self) -> String {
        format!("/registry/{}/", self.plural)
    }

    /// Store key prefix for one namespace of a namespaced kind.
    pub fn namespace_prefix(&self, namespace: &str) -> String {
        format!("/registry/{}/{}/", self.plural, namespace)
    }

    /// Full store key for a record of this kind.
    pub fn key(&self, namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) if self.namespaced => format!("/registry/{}/{}/{}", self.plural, ns, name),
            _ => format!("/registry/{}/{}", self.plural, name),
        }
    }
}

/// A persisted, versioned record: metadata plus kind-specific spec and
/// status sub-objects.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
    const PLURAL: &'static str;
    const NAMESPACED: bool;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn kind_spec() -> KindSpec {
        KindSpec {
            kind: Self::KIND,
            plural: Self::PLURAL,
            namespaced: Self::NAMESPACED,
        }
    }

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Store key of this record.
    fn key(&self) -> String {
        Self::kind_spec().key(self.namespace(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_add_remove() {
        let mut meta = ObjectMeta::namespaced("dev", "db1");
        assert!(meta.add_barrier("stratus.io/resource-cleanup"));
        assert!(!meta.add_barrier("stratus.io/resource-cleanup"));
        assert!(meta.has_barrier("stratus.io/resource-cleanup"));
        assert!(meta.remove_barrier("stratus.io/resource-cleanup"));
        assert!(!meta.remove_barrier("stratus.io/resource-cleanup"));
        assert!(meta.barriers.is_empty());
    }

    #[test]
    fn test_kind_spec_keys() {
        let spec = KindSpec {
            kind: "Team",
            plural: "teams",
            namespaced: true,
        };
        assert_eq!(spec.key(Some("dev"), "platform"), "/registry/teams/dev/platform");
        let cluster = KindSpec {
            kind: "Tenant",
            plural: "tenants",
            namespaced: false,
        };
        assert_eq!(cluster.key(None, "acme"), "/registry/tenants/acme");
    }
}
