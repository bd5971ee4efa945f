//! Label keys and removal-barrier tags.

/// Label carrying the resolved tenant name, stamped on every record
/// attributed to a tenant and on tenant-owned namespaces.
pub const TENANT_LABEL: &str = "stratus.io/tenant";

/// Removal-barrier tags, one per reconciled kind. A record carrying one
/// of these cannot be removed from the store until the owning reconciler
/// strips it after cleanup.
pub const TENANT_BARRIER: &str = "stratus.io/tenant-cleanup";
pub const TEAM_BARRIER: &str = "stratus.io/team-cleanup";
pub const APPLICATION_BARRIER: &str = "stratus.io/application-cleanup";
pub const RESOURCE_BARRIER: &str = "stratus.io/resource-cleanup";

/// Prefix for namespaces owned by tenants: `tenant-<name>`.
pub const TENANT_NAMESPACE_PREFIX: &str = "tenant-";
