use pkg_types::meta::KindSpec;

/// Errors surfaced by the object store.
///
/// `Conflict` is the compare-and-swap miss callers must handle by
/// re-reading and re-applying; `StatusUnsupported` only occurs on test
/// substrates and is handled by the full-update fallback.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("conflict on {kind} {key}: resource version {submitted} is stale")]
    Conflict {
        kind: &'static str,
        key: String,
        submitted: u64,
    },

    #[error("status updates not supported by this store")]
    StatusUnsupported,

    #[error("record is missing metadata: {0}")]
    Malformed(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: KindSpec, namespace: Option<&str>, name: &str) -> Self {
        StoreError::NotFound {
            kind: kind.kind,
            key: kind.key(namespace, name),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
