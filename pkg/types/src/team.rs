use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, Record};
use crate::reference::ObjectRef;
use crate::tenant::Contact;

/// Spending limits for a team.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budget {
    pub monthly_limit: f64,
    /// Fractions of the limit at which alerts fire, e.g. 0.8 for 80%.
    #[serde(default)]
    pub alert_thresholds: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamQuotas {
    #[serde(default)]
    pub max_applications: Option<u32>,
    #[serde(default)]
    pub max_resources: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamSpec {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    /// Authoritative pointer to the owning tenant. May be inferred from
    /// the namespace label by the team reconciler on first pass.
    #[serde(default)]
    pub tenant_ref: Option<ObjectRef>,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(default)]
    pub budget: Option<Budget>,
    #[serde(default)]
    pub quotas: Option<TeamQuotas>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamPhase {
    Active,
    Suspended,
    Archived,
    Deleting,
}

impl fmt::Display for TeamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamPhase::Active => write!(f, "Active"),
            TeamPhase::Suspended => write!(f, "Suspended"),
            TeamPhase::Archived => write!(f, "Archived"),
            TeamPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamResourceCount {
    pub applications: u32,
    pub resources: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamStatus {
    #[serde(default)]
    pub phase: Option<TeamPhase>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub resource_count: Option<TeamResourceCount>,
    #[serde(default)]
    pub observed_generation: u64,
}

/// Namespaced grouping of applications and resources under a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub metadata: ObjectMeta,
    pub spec: TeamSpec,
    #[serde(default)]
    pub status: TeamStatus,
}

impl Record for Team {
    const KIND: &'static str = "Team";
    const PLURAL: &'static str = "teams";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
