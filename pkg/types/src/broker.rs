use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    Azure,
    Aws,
    Gcp,
    OnPrem,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Azure => "azure",
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::OnPrem => "on-prem",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource kind this broker can provision, with the specific
/// implementations and regions available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capability {
    pub resource_kind: String,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Health check path, defaults to "/health".
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u32,
    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u32,
    /// Consecutive failures before the broker is marked Unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_health_interval() -> u32 {
    30
}
fn default_health_timeout() -> u32 {
    5
}
fn default_failure_threshold() -> u32 {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            interval_seconds: default_health_interval(),
            timeout_seconds: default_health_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSpec {
    /// Base URL of the broker API.
    pub endpoint: String,
    pub cloud_provider: CloudProvider,
    /// Cloud region this broker manages, e.g. "eastus", "us-west-2".
    #[serde(default)]
    pub region: Option<String>,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    /// Selection priority; higher wins among otherwise-equal candidates.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Parallel deployment cap; 0 means unlimited.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: i32,
}

fn default_priority() -> i32 {
    100
}
fn default_max_concurrent() -> i32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerPhase {
    Pending,
    Ready,
    Unhealthy,
    Offline,
    Unknown,
}

impl Default for BrokerPhase {
    fn default() -> Self {
        BrokerPhase::Pending
    }
}

impl fmt::Display for BrokerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerPhase::Pending => write!(f, "Pending"),
            BrokerPhase::Ready => write!(f, "Ready"),
            BrokerPhase::Unhealthy => write!(f, "Unhealthy"),
            BrokerPhase::Offline => write!(f, "Offline"),
            BrokerPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerStatus {
    #[serde(default)]
    pub phase: BrokerPhase,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_deployments: i32,
    /// Broker software version as reported at registration.
    #[serde(default)]
    pub version: Option<String>,
    /// Base64-encoded Ed25519 public key used to verify callbacks.
    /// Only overwritten when the broker itself re-registers.
    #[serde(default)]
    pub callback_public_key: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub message: Option<String>,
    /// Probe failures since the last success, for flap debouncing.
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub observed_generation: u64,
}

/// A stateless provisioning worker bound to a cloud/region, dispatched
/// to over HTTP and probed for health on an interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub metadata: ObjectMeta,
    pub spec: BrokerSpec,
    #[serde(default)]
    pub status: BrokerStatus,
}

impl Broker {
    /// Full health probe URL for this broker.
    pub fn health_url(&self) -> String {
        let path = self
            .spec
            .health_check
            .as_ref()
            .and_then(|hc| hc.endpoint.as_deref())
            .unwrap_or("/health");
        format!("{}{}", self.spec.endpoint.trim_end_matches('/'), path)
    }

    /// Probe cadence, clamped to the minimum allowed interval.
    pub fn health_interval_seconds(&self) -> u32 {
        let configured = self
            .spec
            .health_check
            .as_ref()
            .map(|hc| hc.interval_seconds)
            .unwrap_or(default_health_interval());
        configured.max(5)
    }

    pub fn health_timeout_seconds(&self) -> u32 {
        self.spec
            .health_check
            .as_ref()
            .map(|hc| hc.timeout_seconds)
            .unwrap_or(default_health_timeout())
    }

    pub fn failure_threshold(&self) -> u32 {
        self.spec
            .health_check
            .as_ref()
            .map(|hc| hc.failure_threshold)
            .unwrap_or(default_failure_threshold())
    }
}

impl Record for Broker {
    const KIND: &'static str = "Broker";
    const PLURAL: &'static str = "brokers";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
