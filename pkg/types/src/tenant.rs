use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, Record};

/// A contact for a tenant or team.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub slack: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantQuotas {
    #[serde(default)]
    pub max_teams: Option<u32>,
    #[serde(default)]
    pub max_applications: Option<u32>,
    #[serde(default)]
    pub max_resources: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSpec {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub billing_code: Option<String>,
    #[serde(default)]
    pub quotas: Option<TenantQuotas>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantPhase {
    Active,
    Suspended,
    Archived,
}

impl fmt::Display for TenantPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantPhase::Active => write!(f, "Active"),
            TenantPhase::Suspended => write!(f, "Suspended"),
            TenantPhase::Archived => write!(f, "Archived"),
        }
    }
}

/// Resource counts aggregated across everything labelled with the tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantResourceCount {
    pub teams: u32,
    pub applications: u32,
    pub resources: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantStatus {
    #[serde(default)]
    pub phase: Option<TenantPhase>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub resource_count: Option<TenantResourceCount>,
    #[serde(default)]
    pub current_spend: f64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observed_generation: u64,
}

/// Cluster-scoped organizational root. Owns a dedicated namespace named
/// `tenant-<name>` labelled with the tenant label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub metadata: ObjectMeta,
    pub spec: TenantSpec,
    #[serde(default)]
    pub status: TenantStatus,
}

impl Tenant {
    /// Name of the namespace owned by this tenant.
    pub fn namespace_name(&self) -> String {
        format!("tenant-{}", self.metadata.name)
    }
}

impl Record for Tenant {
    const KIND: &'static str = "Tenant";
    const PLURAL: &'static str = "tenants";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
