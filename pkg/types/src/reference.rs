use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to another record by name, optionally qualified with a
/// namespace (omitted for cluster-scoped targets or "same namespace").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

/// Kinds that may own another record. Owner references are logical
/// pointers for tenant attribution and deletion safety, not GC links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Tenant,
    Team,
    Application,
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerKind::Tenant => write!(f, "Tenant"),
            OwnerKind::Team => write!(f, "Team"),
            OwnerKind::Application => write!(f, "Application"),
        }
    }
}

/// Points at the record that owns this one. The namespace defaults to
/// the child's namespace when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: OwnerKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl OwnerReference {
    pub fn new(kind: OwnerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }
}
