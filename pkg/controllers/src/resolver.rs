use pkg_constants::labels::TENANT_LABEL;
use pkg_state::{Store, StoreError, StoreExt};
use pkg_types::application::Application;
use pkg_types::namespace::Namespace;
use pkg_types::reference::{OwnerKind, OwnerReference};
use pkg_types::resource::ManagedResource;
use pkg_types::team::Team;
use pkg_types::tenant::Tenant;

/// Ownership chains longer than this are treated as cycles.
const MAX_DEPTH: u32 = 6;

/// Why a record could not be attributed to a tenant. Every variant
/// except `Store` means "unresolvable": the record suspends until a
/// relevant object changes. `Store` wraps infrastructure failures,
/// which are retried instead.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("referenced tenant {name} not found")]
    ReferencedTenantMissing { name: String },

    #[error("owner {kind} {namespace}/{name} not found")]
    OwnerMissing {
        kind: OwnerKind,
        namespace: String,
        name: String,
    },

    #[error("tenant resolution exceeded max depth of {MAX_DEPTH} (ownership cycle?)")]
    DepthExhausted,

    #[error("tenant label {tenant} on namespace {namespace} points to a missing tenant")]
    LabelTenantMissing { tenant: String, namespace: String },

    #[error("tenant unresolved")]
    Unresolved,

    #[error(transparent)]
    Store(StoreError),
}

impl ResolveError {
    /// True when the failure suspends the record rather than retrying.
    pub fn is_unresolvable(&self) -> bool {
        !matches!(self, ResolveError::Store(_))
    }
}

/// The record being attributed. Tenants resolve to themselves and are
/// never targets.
pub enum ResolveTarget<'a> {
    Team(&'a Team),
    Application(&'a Application),
    Resource(&'a ManagedResource),
}

enum Node {
    Team(Team),
    Application(Application),
    Resource(ManagedResource),
}

impl Node {
    fn namespace(&self) -> Option<&str> {
        match self {
            Node::Team(t) => t.metadata.namespace.as_deref(),
            Node::Application(a) => a.metadata.namespace.as_deref(),
            Node::Resource(r) => r.metadata.namespace.as_deref(),
        }
    }

    /// Direct tenant pointer, if the record carries one.
    fn tenant_shortcut(&self) -> Option<&str> {
        match self {
            Node::Team(t) => t.spec.tenant_ref.as_ref().map(|r| r.name.as_str()),
            Node::Application(a) => owner_tenant(a.spec.owner.as_ref()),
            Node::Resource(r) => owner_tenant(r.spec.owner.as_ref()),
        }
    }

    /// Non-tenant owner to traverse, if any.
    fn traversable_owner(&self) -> Option<&OwnerReference> {
        let owner = match self {
            Node::Team(_) => None,
            Node::Application(a) => a.spec.owner.as_ref(),
            Node::Resource(r) => r.spec.owner.as_ref(),
        }?;
        (owner.kind != OwnerKind::Tenant).then_some(owner)
    }
}

fn owner_tenant(owner: Option<&OwnerReference>) -> Option<&str> {
    owner
        .filter(|o| o.kind == OwnerKind::Tenant)
        .map(|o| o.name.as_str())
}

/// Attribute a record to exactly one tenant.
///
/// Strategy, with a depth budget of six hops:
/// 1. Direct tenant reference on the record itself.
/// 2. Owner traversal: fetch the owner (namespace defaults to the
///    child's) and continue from it.
/// 3. Namespace-label fallback: the record's namespace may carry a
///    tenant label pointing at the owning tenant.
///
/// Resolution performs only reads; with the store frozen, repeated
/// calls return the same tenant or the same failure reason.
pub async fn resolve_tenant<S: Store>(
    store: &S,
    target: ResolveTarget<'_>,
) -> Result<Tenant, ResolveError> {
    let mut node = match target {
        ResolveTarget::Team(t) => Node::Team(t.clone()),
        ResolveTarget::Application(a) => Node::Application(a.clone()),
        ResolveTarget::Resource(r) => Node::Resource(r.clone()),
    };

    for _ in 0..=MAX_DEPTH {
        // 1) Direct tenant reference.
        if let Some(tenant_name) = node.tenant_shortcut() {
            return fetch_tenant(store, tenant_name).await;
        }

        // 2) Follow the owner chain.
        let Some(owner) = node.traversable_owner() else {
            // 3) Namespace-label fallback.
            return resolve_from_namespace_label(store, node.namespace()).await;
        };

        let namespace = owner
            .namespace
            .as_deref()
            .or(node.namespace())
            .unwrap_or_default()
            .to_string();
        let owner_kind = owner.kind;
        let owner_name = owner.name.clone();

        node = match owner_kind {
            OwnerKind::Team => Node::Team(
                fetch_owner::<S, Team>(store, owner_kind, &namespace, &owner_name).await?,
            ),
            OwnerKind::Application => Node::Application(
                fetch_owner::<S, Application>(store, owner_kind, &namespace, &owner_name).await?,
            ),
            OwnerKind::Tenant => unreachable!("tenant owners are handled by the shortcut"),
        };
    }

    Err(ResolveError::DepthExhausted)
}

async fn fetch_tenant<S: Store>(store: &S, name: &str) -> Result<Tenant, ResolveError> {
    match store.get::<Tenant>(None, name).await {
        Ok(tenant) => Ok(tenant),
        Err(e) if e.is_not_found() => Err(ResolveError::ReferencedTenantMissing {
            name: name.to_string(),
        }),
        Err(e) => Err(ResolveError::Store(e)),
    }
}

async fn fetch_owner<S: Store, R: pkg_types::meta::Record>(
    store: &S,
    kind: OwnerKind,
    namespace: &str,
    name: &str,
) -> Result<R, ResolveError> {
    match store.get::<R>(Some(namespace), name).await {
        Ok(record) => Ok(record),
        Err(e) if e.is_not_found() => Err(ResolveError::OwnerMissing {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
        Err(e) => Err(ResolveError::Store(e)),
    }
}

async fn resolve_from_namespace_label<S: Store>(
    store: &S,
    namespace: Option<&str>,
) -> Result<Tenant, ResolveError> {
    let Some(ns_name) = namespace else {
        return Err(ResolveError::Unresolved);
    };
    let ns = match store.get::<Namespace>(None, ns_name).await {
        Ok(ns) => ns,
        Err(e) if e.is_not_found() => return Err(ResolveError::Unresolved),
        Err(e) => return Err(ResolveError::Store(e)),
    };
    let Some(tenant_name) = ns.metadata.labels.get(TENANT_LABEL).filter(|t| !t.is_empty()) else {
        return Err(ResolveError::Unresolved);
    };
    match store.get::<Tenant>(None, tenant_name).await {
        Ok(tenant) => Ok(tenant),
        Err(e) if e.is_not_found() => Err(ResolveError::LabelTenantMissing {
            tenant: tenant_name.clone(),
            namespace: ns_name.to_string(),
        }),
        Err(e) => Err(ResolveError::Store(e)),
    }
}
