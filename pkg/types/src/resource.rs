use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, Record};
use crate::reference::{ObjectRef, OwnerReference};

/// Supported engine implementations for managed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgresql,
    Mysql,
    Mongodb,
    Redis,
    Sqlserver,
}

impl Engine {
    /// Wire name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgresql => "postgresql",
            Engine::Mysql => "mysql",
            Engine::Mongodb => "mongodb",
            Engine::Redis => "redis",
            Engine::Sqlserver => "sqlserver",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance size classes understood by brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
            SizeClass::Xlarge => "xlarge",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Retention period, e.g. "7d", "30d".
    #[serde(default)]
    pub retention: Option<String>,
    /// Cron schedule.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub point_in_time_restore: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub at_rest: bool,
    #[serde(default)]
    pub kms_key_id: Option<String>,
    #[serde(default)]
    pub in_transit: bool,
    #[serde(default)]
    pub min_tls_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedResourceSpec {
    /// Owning Team, Application, or Tenant. Records without an owner
    /// fall back to namespace-label tenant attribution.
    #[serde(default)]
    pub owner: Option<OwnerReference>,
    pub engine: Engine,
    pub version: String,
    pub size: SizeClass,
    /// Placement hint, e.g. "azure-westus2-prod".
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub backup: Option<BackupConfig>,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    #[serde(default)]
    pub high_availability: bool,
    /// Engine-specific configuration passed through to the broker.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourcePhase {
    Pending,
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Suspended,
}

impl Default for ResourcePhase {
    fn default() -> Self {
        ResourcePhase::Pending
    }
}

impl fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePhase::Pending => write!(f, "Pending"),
            ResourcePhase::Provisioning => write!(f, "Provisioning"),
            ResourcePhase::Ready => write!(f, "Ready"),
            ResourcePhase::Failed => write!(f, "Failed"),
            ResourcePhase::Deleting => write!(f, "Deleting"),
            ResourcePhase::Suspended => write!(f, "Suspended"),
        }
    }
}

/// Reference to a secret holding connection credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostInfo {
    /// Estimated monthly cost in USD.
    pub estimated_monthly: f64,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedResourceStatus {
    #[serde(default)]
    pub phase: ResourcePhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Correlation ID assigned by the broker on `accepted`. Write-once.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// The broker that accepted the provision call. Write-once.
    #[serde(default)]
    pub broker_ref: Option<ObjectRef>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub connection_secret_ref: Option<SecretRef>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub cost: Option<CostInfo>,
    #[serde(default)]
    pub last_backup: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observed_generation: u64,
}

/// A declaratively managed infrastructure resource (databases are the
/// worked example; caches and queues follow the same shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedResource {
    pub metadata: ObjectMeta,
    pub spec: ManagedResourceSpec,
    #[serde(default)]
    pub status: ManagedResourceStatus,
}

impl Record for ManagedResource {
    const KIND: &'static str = "ManagedResource";
    const PLURAL: &'static str = "managedresources";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
