use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::Condition;
use crate::meta::{ObjectMeta, Record};
use crate::reference::OwnerReference;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Owning Team, parent Application, or Tenant. Records without an
    /// owner fall back to namespace-label tenant attribution.
    #[serde(default)]
    pub owner: Option<OwnerReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationPhase {
    Draft,
    Active,
    Suspended,
    Archived,
}

impl fmt::Display for ApplicationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationPhase::Draft => write!(f, "Draft"),
            ApplicationPhase::Active => write!(f, "Active"),
            ApplicationPhase::Suspended => write!(f, "Suspended"),
            ApplicationPhase::Archived => write!(f, "Archived"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationStatus {
    #[serde(default)]
    pub phase: Option<ApplicationPhase>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: u64,
}

/// A deployable unit owned by a team (or nested under another
/// application); managed resources point at it as their owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Record for Application {
    const KIND: &'static str = "Application";
    const PLURAL: &'static str = "applications";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
