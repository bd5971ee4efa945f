use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use clap::Parser;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use pkg_dispatch::models::StatusResponse;
use pkg_dispatch::{CallbackSender, DeprovisionRequest, ProvisionRequest};
use pkg_signing::{encode_verifying_key, load_or_generate_key};
use pkg_types::config::{BrokerConfigFile, load_config_file};

mod provisioner;
mod register;

use provisioner::{Deployment, simulate_deprovision, simulate_provision};

const VERSION: &str = "0.1.0";

#[derive(Parser, Debug)]
#[command(name = "stratus-broker", about = "stratus provisioning broker")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/stratus/broker.yaml")]
    config: String,

    /// HTTP server port
    #[arg(long)]
    port: Option<u16>,

    /// Manager base URL for registration
    #[arg(long)]
    manager_url: Option<String>,

    /// Broker record name for signature attribution
    #[arg(long)]
    broker_name: Option<String>,

    /// Namespace of the broker record
    #[arg(long)]
    broker_namespace: Option<String>,

    /// Filesystem location of the Ed25519 private key
    #[arg(long)]
    private_key_path: Option<String>,

    /// Token presented when registering with the manager
    #[arg(long)]
    join_token: Option<String>,
}

/// Shared broker state: in-memory deployment tracking plus the signed
/// callback sender.
pub struct BrokerState {
    pub deployments: DashMap<String, Deployment>,
    pub sender: Arc<CallbackSender>,
    pub start_time: Instant,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let file_cfg: BrokerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > environment > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(8080);
    let manager_url = cli
        .manager_url
        .or(file_cfg.manager_url)
        .or_else(|| env_var("STRATUS_MANAGER_URL"))
        .unwrap_or_else(|| "http://127.0.0.1:9090".to_string());
    let broker_name = cli
        .broker_name
        .or(file_cfg.broker_name)
        .or_else(|| env_var("BROKER_NAME"))
        .unwrap_or_else(|| "unknown-broker".to_string());
    let broker_namespace = cli
        .broker_namespace
        .or(file_cfg.broker_namespace)
        .or_else(|| env_var("BROKER_NAMESPACE"))
        .unwrap_or_else(|| "default".to_string());
    let key_path = cli
        .private_key_path
        .or(file_cfg.private_key_path)
        .or_else(|| env_var("BROKER_PRIVATE_KEY_PATH"))
        .unwrap_or_else(|| "/var/run/broker/private.key".to_string());
    let join_token = cli
        .join_token
        .or(file_cfg.join_token)
        .or_else(|| env_var("STRATUS_JOIN_TOKEN"))
        .unwrap_or_else(|| "demo-token-123".to_string());

    info!("Starting stratus-broker v{}", VERSION);
    info!("  Port:      {}", port);
    info!("  Manager:   {}", manager_url);
    info!("  Identity:  {}/{}", broker_namespace, broker_name);

    // Key generation happens once, guarded by file existence.
    let key = load_or_generate_key(&key_path)?;
    let public_key = encode_verifying_key(&key.verifying_key());

    // Publish the public key; the callback header bootstrap covers the
    // window where the manager is not up yet.
    register::register_with_manager(
        &manager_url,
        &join_token,
        &broker_name,
        &broker_namespace,
        &public_key,
        VERSION,
    )
    .await;

    let state = Arc::new(BrokerState {
        deployments: DashMap::new(),
        sender: Arc::new(CallbackSender::new(broker_name.clone(), key)),
        start_time: Instant::now(),
    });

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/readiness", get(handle_readiness))
        .route("/v1/provision", post(handle_provision))
        .route("/v1/deprovision", post(handle_deprovision))
        .route("/v1/status", get(handle_status))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("HTTP server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down broker");
        })
        .await?;

    Ok(())
}

/// GET /health: the status code is authoritative; the body is
/// informational.
async fn handle_health(State(state): State<Arc<BrokerState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    Json(serde_json::json!({
        "status": "healthy",
        "version": VERSION,
        "time": Utc::now().to_rfc3339(),
        "uptimeSeconds": uptime.as_secs(),
        "activeDeployments": state.deployments.len(),
    }))
}

async fn handle_readiness() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ready"}))
}

/// POST /v1/provision: accept and simulate asynchronously.
async fn handle_provision(
    State(state): State<Arc<BrokerState>>,
    Json(request): Json<ProvisionRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid request", "message": e})),
        )
            .into_response();
    }

    let deployment_id = format!("d-{}", Uuid::new_v4().simple());
    info!(
        "Accepted provision request: {}/{} ({}) -> {}",
        request.namespace, request.resource_name, request.resource_type, deployment_id
    );

    state.deployments.insert(
        deployment_id.clone(),
        Deployment::new(&deployment_id, &request),
    );
    tokio::spawn(simulate_provision(
        state.clone(),
        deployment_id.clone(),
        request,
    ));

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "deploymentId": deployment_id,
            "message": "provisioning started",
        })),
    )
        .into_response()
}

/// POST /v1/deprovision: accept and tear down asynchronously.
async fn handle_deprovision(
    State(state): State<Arc<BrokerState>>,
    Json(request): Json<DeprovisionRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid request", "message": e})),
        )
            .into_response();
    }

    info!(
        "Accepted deprovision request: {} ({}/{})",
        request.deployment_id, request.namespace, request.resource_name
    );
    tokio::spawn(simulate_deprovision(state.clone(), request));

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "message": "deprovisioning started",
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(rename = "deploymentId")]
    deployment_id: String,
}

/// GET /v1/status?deploymentId=...
async fn handle_status(
    State(state): State<Arc<BrokerState>>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    match state.deployments.get(&query.deployment_id) {
        Some(deployment) => Json(StatusResponse {
            deployment_id: query.deployment_id,
            phase: deployment.phase.clone(),
            message: deployment.message.clone(),
            last_updated: deployment.last_updated,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown deployment"})),
        )
            .into_response(),
    }
}
