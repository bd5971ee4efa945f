//! Wire types exchanged with brokers. Field names follow the JSON
//! contract, camelCased on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request to provision a resource, POSTed to `<broker>/v1/provision`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub resource_type: String,
    pub resource_name: String,
    pub namespace: String,
    /// Owning entity as "<kind>/<name>".
    pub team: String,
    pub owner: String,
    /// URL the broker POSTs status callbacks to.
    pub callback_url: String,
    /// Resource-specific configuration (engine, version, size, ...).
    pub spec: serde_json::Map<String, serde_json::Value>,
}

impl ProvisionRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.resource_type.is_empty() {
            return Err("resourceType is required".to_string());
        }
        if self.resource_name.is_empty() {
            return Err("resourceName is required".to_string());
        }
        if self.namespace.is_empty() {
            return Err("namespace is required".to_string());
        }
        if self.team.is_empty() {
            return Err("team is required".to_string());
        }
        if self.callback_url.is_empty() {
            return Err("callbackUrl is required".to_string());
        }
        Ok(())
    }
}

/// Immediate 202 response to a provision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    /// "accepted" on success.
    pub status: String,
    /// Correlation ID for all later callbacks about this deployment.
    pub deployment_id: String,
    pub message: String,
}

/// Request to tear down a deployment, POSTed to `<broker>/v1/deprovision`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeprovisionRequest {
    pub deployment_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub namespace: String,
    pub callback_url: String,
}

impl DeprovisionRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.deployment_id.is_empty() {
            return Err("deploymentId is required".to_string());
        }
        if self.resource_type.is_empty() {
            return Err("resourceType is required".to_string());
        }
        if self.resource_name.is_empty() {
            return Err("resourceName is required".to_string());
        }
        if self.namespace.is_empty() {
            return Err("namespace is required".to_string());
        }
        if self.callback_url.is_empty() {
            return Err("callbackUrl is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeprovisionResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackStatus {
    Success,
    Failed,
    InProgress,
}

/// Asynchronous status update sent from a broker back to the control
/// plane at `<callback>/v1/callback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub deployment_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub namespace: String,

    pub status: CallbackStatus,
    /// Provisioning, Ready, Failed, Deleting, Deleted.
    pub phase: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: DateTime<Utc>,

    // Resource details, populated when Ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Name of the secret holding connection credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_cost: Option<f64>,
}

/// Response when querying the status of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub deployment_id: String,
    pub phase: String,
    pub message: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}
