use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pkg_controllers::status::update_status_with_fallback;
use pkg_state::{Store, StoreExt};
use pkg_types::broker::Broker;

use crate::AppState;

/// Body of `POST /v1/broker-register`: a broker announcing itself and
/// publishing its callback public key on startup or rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub namespace: String,
    /// Base64 Ed25519 public key used to verify this broker's callbacks.
    pub public_key: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Registration is the one path allowed to overwrite an existing
/// callback public key: it is the broker's own update. The endpoint is
/// guarded by the deployment join token.
pub async fn handle_register<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> impl IntoResponse {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == state.join_token)
        .unwrap_or(false);
    if !authorized {
        warn!("Broker registration with invalid join token: {}", request.name);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut broker: Broker = match state
        .store
        .get(Some(&request.namespace), &request.name)
        .await
    {
        Ok(b) => b,
        Err(e) if e.is_not_found() => {
            warn!(
                "Registration for unknown broker {}/{}",
                request.namespace, request.name
            );
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            warn!("Failed to load broker for registration: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let rotated = broker.status.callback_public_key.as_deref() != Some(&request.public_key);
    broker.status.callback_public_key = Some(request.public_key);
    if request.version.is_some() {
        broker.status.version = request.version;
    }

    if let Err(e) = update_status_with_fallback(state.store.as_ref(), &broker).await {
        warn!("Failed to store broker public key: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(
        "Registered broker {}/{} (key rotated: {})",
        request.namespace, request.name, rotated
    );
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "registered"})),
    )
        .into_response()
}
