//! Simulated provisioning: tracks deployments in memory and drives the
//! signed callback flow the way a real cloud worker would.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use pkg_dispatch::{CallbackRequest, CallbackStatus, DeprovisionRequest, ProvisionRequest};

use crate::BrokerState;

/// How long a simulated provision takes.
const PROVISION_DELAY: Duration = Duration::from_secs(2);
const DEPROVISION_DELAY: Duration = Duration::from_secs(1);

/// In-memory record of a deployment this broker accepted.
pub struct Deployment {
    pub deployment_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub namespace: String,
    pub phase: String,
    pub message: String,
    pub last_updated: DateTime<Utc>,
}

impl Deployment {
    pub fn new(deployment_id: &str, request: &ProvisionRequest) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            resource_type: request.resource_type.clone(),
            resource_name: request.resource_name.clone(),
            namespace: request.namespace.clone(),
            phase: "Provisioning".to_string(),
            message: "provisioning started".to_string(),
            last_updated: Utc::now(),
        }
    }
}

fn engine_port(engine: Option<&str>) -> u16 {
    match engine {
        Some("postgresql") => 5432,
        Some("mysql") => 3306,
        Some("mongodb") => 27017,
        Some("redis") => 6379,
        Some("sqlserver") => 1433,
        _ => 5432,
    }
}

fn estimated_cost(size: Option<&str>) -> f64 {
    match size {
        Some("small") => 25.0,
        Some("medium") => 50.0,
        Some("large") => 100.0,
        Some("xlarge") => 200.0,
        _ => 25.0,
    }
}

fn base_callback(deployment_id: &str, request: &ProvisionRequest) -> CallbackRequest {
    CallbackRequest {
        deployment_id: deployment_id.to_string(),
        resource_type: request.resource_type.clone(),
        resource_name: request.resource_name.clone(),
        namespace: request.namespace.clone(),
        status: CallbackStatus::InProgress,
        phase: "Provisioning".to_string(),
        message: String::new(),
        error: None,
        time: Utc::now(),
        endpoint: None,
        port: None,
        connection_secret: None,
        additional_metadata: None,
        estimated_monthly_cost: None,
    }
}

fn update_deployment(state: &BrokerState, deployment_id: &str, phase: &str, message: &str) {
    if let Some(mut deployment) = state.deployments.get_mut(deployment_id) {
        deployment.phase = phase.to_string();
        deployment.message = message.to_string();
        deployment.last_updated = Utc::now();
    }
}

/// Simulate a provision: progress callback, a short delay, then the
/// success callback carrying endpoint, credentials and cost.
pub async fn simulate_provision(
    state: Arc<BrokerState>,
    deployment_id: String,
    request: ProvisionRequest,
) {
    let mut progress = base_callback(&deployment_id, &request);
    progress.message = "creating resources".to_string();
    if let Err(e) = state.sender.notify(&request.callback_url, &progress).await {
        warn!("Progress callback for {} failed: {}", deployment_id, e);
    }

    tokio::time::sleep(PROVISION_DELAY).await;

    let engine = request.spec.get("engine").and_then(|v| v.as_str());
    let size = request.spec.get("size").and_then(|v| v.as_str());

    let mut success = base_callback(&deployment_id, &request);
    success.status = CallbackStatus::Success;
    success.phase = "Ready".to_string();
    success.message = format!("{} provisioned", request.resource_name);
    success.time = Utc::now();
    success.endpoint = Some(format!(
        "{}.{}.svc.local",
        request.resource_name, request.namespace
    ));
    success.port = Some(engine_port(engine));
    success.connection_secret = Some(format!("{}-credentials", request.resource_name));
    success.estimated_monthly_cost = Some(estimated_cost(size));

    update_deployment(&state, &deployment_id, "Ready", &success.message);
    match state.sender.notify(&request.callback_url, &success).await {
        Ok(()) => info!("Deployment {} is Ready", deployment_id),
        Err(e) => warn!("Success callback for {} failed: {}", deployment_id, e),
    }
}

/// Simulate a deprovision: a short delay, then the deletion callback
/// and removal from the tracker.
pub async fn simulate_deprovision(state: Arc<BrokerState>, request: DeprovisionRequest) {
    update_deployment(&state, &request.deployment_id, "Deleting", "tearing down");
    tokio::time::sleep(DEPROVISION_DELAY).await;

    let callback = CallbackRequest {
        deployment_id: request.deployment_id.clone(),
        resource_type: request.resource_type.clone(),
        resource_name: request.resource_name.clone(),
        namespace: request.namespace.clone(),
        status: CallbackStatus::Success,
        phase: "Deleted".to_string(),
        message: format!("{} deprovisioned", request.resource_name),
        error: None,
        time: Utc::now(),
        endpoint: None,
        port: None,
        connection_secret: None,
        additional_metadata: None,
        estimated_monthly_cost: None,
    };

    state.deployments.remove(&request.deployment_id);
    match state.sender.notify(&request.callback_url, &callback).await {
        Ok(()) => info!("Deployment {} deprovisioned", request.deployment_id),
        Err(e) => warn!(
            "Deprovision callback for {} failed: {}",
            request.deployment_id, e
        ),
    }
}
