use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{error, info, warn};

use pkg_controllers::status::update_status_with_fallback;
use pkg_dispatch::{CallbackRequest, CallbackStatus};
use pkg_metrics::{CALLBACKS_RECEIVED, CALLBACKS_REJECTED, INVARIANT_VIOLATIONS};
use pkg_signing::{
    BROKER_NAME_HEADER, PUBLIC_KEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, VerifyError,
    verify_signature, verify_timestamp,
};
use pkg_state::{Store, StoreExt};
use pkg_types::broker::Broker;
use pkg_types::condition::{Condition, ConditionStatus, set_condition};
use pkg_types::meta::Record;
use pkg_types::resource::{CostInfo, ManagedResource, ResourcePhase, SecretRef};

use crate::AppState;

/// POST /v1/callback: a broker reporting deployment progress.
///
/// Verification precedes any record access; an unauthenticated caller
/// cannot mutate state or learn whether a correlation ID exists.
pub async fn handle_callback<S: Store>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let callback: CallbackRequest = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to decode callback body: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
        }
    };

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let (Some(broker_name), Some(timestamp), Some(signature)) = (
        header(BROKER_NAME_HEADER),
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
    ) else {
        return reject(StatusCode::UNAUTHORIZED, "missing signature headers");
    };

    // Replay protection.
    match verify_timestamp(&timestamp, Utc::now()) {
        Ok(_) => {}
        Err(VerifyError::InvalidTimestamp(e)) => {
            warn!("Invalid callback timestamp: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid timestamp").into_response();
        }
        Err(_) => {
            return reject(StatusCode::UNAUTHORIZED, "timestamp outside allowed range");
        }
    }

    // The public key comes from the broker record; the header is only
    // honored for first-contact bootstrap and never overwrites.
    let broker = match find_broker(state.store.as_ref(), &broker_name).await {
        Ok(Some(b)) => b,
        Ok(None) => return reject(StatusCode::UNAUTHORIZED, "unknown broker"),
        Err(response) => return response,
    };
    let (public_key, bootstrapped) = match &broker.status.callback_public_key {
        Some(key) => (key.clone(), false),
        None => match header(PUBLIC_KEY_HEADER) {
            Some(bootstrap_key) => (bootstrap_key, true),
            None => return reject(StatusCode::UNAUTHORIZED, "no public key available"),
        },
    };

    // Deterministic re-marshalling of the decoded body; field order is
    // stable, so this reproduces what the broker signed.
    let canonical = match serde_json::to_vec(&callback) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to re-marshal callback for verification: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(e) = verify_signature(&public_key, &timestamp, &canonical, &signature) {
        warn!(
            "Signature verification failed for broker {}: {}",
            broker_name, e
        );
        return reject(StatusCode::UNAUTHORIZED, "invalid signature");
    }
    if bootstrapped {
        // First contact: the header key verified the signature, so
        // store it. Later rotations must come through registration.
        persist_bootstrap_key(state.store.as_ref(), broker, &public_key).await;
    }

    info!(
        "Received callback: correlation={}, resourceType={}, status={:?}, phase={}",
        callback.deployment_id, callback.resource_type, callback.status, callback.phase
    );

    let result = match callback.resource_type.as_str() {
        ManagedResource::KIND => apply_resource_callback(state.store.as_ref(), &callback).await,
        other => {
            warn!("Callback for unknown resource type: {}", other);
            return (StatusCode::BAD_REQUEST, "unknown resource type").into_response();
        }
    };

    match result {
        Ok(()) => {
            pkg_metrics::global().counter_inc(CALLBACKS_RECEIVED);
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "accepted"})),
            )
                .into_response()
        }
        Err(response) => response,
    }
}

fn reject(status: StatusCode, message: &'static str) -> Response {
    warn!("Rejecting callback: {}", message);
    pkg_metrics::global().counter_inc(CALLBACKS_REJECTED);
    (status, message).into_response()
}

async fn find_broker<S: Store>(store: &S, name: &str) -> Result<Option<Broker>, Response> {
    let brokers: Vec<Broker> = store.list(None).await.map_err(|e| {
        error!("Failed to list brokers for callback verification: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;
    Ok(brokers.into_iter().find(|b| b.metadata.name == name))
}

/// First contact from a broker whose record has no key yet: persist the
/// header key so later rotations require the broker's own update.
async fn persist_bootstrap_key<S: Store>(store: &S, mut broker: Broker, key: &str) {
    broker.status.callback_public_key = Some(key.to_string());
    if let Err(e) = update_status_with_fallback(store, &broker).await {
        warn!(
            "Failed to persist bootstrap public key for broker {}: {}",
            broker.metadata.name, e
        );
    }
}

/// Locate the record by correlation ID and apply the status transition.
async fn apply_resource_callback<S: Store>(
    store: &S,
    callback: &CallbackRequest,
) -> Result<(), Response> {
    let resources: Vec<ManagedResource> =
        store.list(Some(&callback.namespace)).await.map_err(|e| {
            error!("Failed to list resources for callback: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    let mut matches: Vec<ManagedResource> = resources
        .into_iter()
        .filter(|r| r.status.correlation_id.as_deref() == Some(callback.deployment_id.as_str()))
        .collect();

    let mut resource = match matches.len() {
        0 => {
            // The record was deleted, or the callback is foreign.
            info!(
                "No resource found for correlation {} in {}",
                callback.deployment_id, callback.namespace
            );
            return Err((StatusCode::NOT_FOUND, "no record for correlation id").into_response());
        }
        1 => matches.remove(0),
        n => {
            error!(
                "{} resources in {} share correlation {}; refusing to apply callback",
                n, callback.namespace, callback.deployment_id
            );
            pkg_metrics::global().counter_inc(INVARIANT_VIOLATIONS);
            return Err(
                (StatusCode::INTERNAL_SERVER_ERROR, "correlation id is ambiguous").into_response(),
            );
        }
    };

    apply_transition(&mut resource, callback);

    match update_status_with_fallback(store, &resource).await {
        Ok(_) => {
            info!(
                "Updated resource {}/{}: phase={}, status={:?}",
                callback.namespace, resource.metadata.name, resource.status.phase, callback.status
            );
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            // The broker retries; the re-sent callback re-applies cleanly.
            warn!(
                "Conflict applying callback for {}: {}",
                resource.metadata.name, e
            );
            Err((StatusCode::INTERNAL_SERVER_ERROR, "store conflict, retry").into_response())
        }
        Err(e) => {
            error!("Failed to update resource status from callback: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn apply_transition(resource: &mut ManagedResource, callback: &CallbackRequest) {
    match callback.status {
        CallbackStatus::Success if callback.phase == "Ready" => {
            resource.status.phase = ResourcePhase::Ready;
            resource.status.endpoint = callback.endpoint.clone();
            resource.status.port = callback.port;
            resource.status.message = Some(callback.message.clone());
            if let Some(secret) = &callback.connection_secret {
                resource.status.connection_secret_ref = Some(SecretRef {
                    name: secret.clone(),
                    namespace: callback.namespace.clone(),
                });
            }
            if let Some(cost) = callback.estimated_monthly_cost {
                resource.status.cost = Some(CostInfo {
                    estimated_monthly: cost,
                    currency: "USD".to_string(),
                    last_updated: callback.time,
                });
            }
            let mut condition = Condition::new(
                "Ready",
                ConditionStatus::True,
                "ProvisioningSucceeded",
                callback.message.as_str(),
            );
            condition.last_transition_time = callback.time;
            set_condition(&mut resource.status.conditions, condition);
        }
        CallbackStatus::Success => {
            // Completion of a non-provisioning step (e.g. teardown
            // progress); phase and message only.
            if let Some(phase) = parse_phase(&callback.phase) {
                resource.status.phase = phase;
            }
            resource.status.message = Some(callback.message.clone());
        }
        CallbackStatus::Failed => {
            let detail = callback
                .error
                .clone()
                .unwrap_or_else(|| callback.message.clone());
            let mut condition = Condition::new(
                "Ready",
                ConditionStatus::False,
                "ProvisioningFailed",
                detail.as_str(),
            );
            condition.last_transition_time = callback.time;
            set_condition(&mut resource.status.conditions, condition);
            resource.status.message = Some(detail);
            // A late failure for a record that already recovered is
            // informational only.
            if resource.status.phase != ResourcePhase::Ready {
                resource.status.phase = ResourcePhase::Failed;
            }
        }
        CallbackStatus::InProgress => {
            if let Some(phase) = parse_phase(&callback.phase) {
                resource.status.phase = phase;
            }
            resource.status.message = Some(callback.message.clone());
        }
    }
}

fn parse_phase(phase: &str) -> Option<ResourcePhase> {
    match phase {
        "Pending" => Some(ResourcePhase::Pending),
        "Provisioning" => Some(ResourcePhase::Provisioning),
        "Ready" => Some(ResourcePhase::Ready),
        "Failed" => Some(ResourcePhase::Failed),
        "Deleting" => Some(ResourcePhase::Deleting),
        "Suspended" => Some(ResourcePhase::Suspended),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use pkg_signing::{encode_verifying_key, sign_payload};
    use pkg_state::MemoryStore;
    use pkg_types::broker::{BrokerSpec, BrokerStatus, CloudProvider};
    use pkg_types::condition::find_condition;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::resource::{Engine, ManagedResourceSpec, SizeClass};
    use std::sync::Arc;

    fn make_state() -> AppState<MemoryStore> {
        AppState {
            store: Arc::new(MemoryStore::new()),
            join_token: "secret-token".to_string(),
        }
    }

    fn make_broker(public_key: Option<String>) -> Broker {
        Broker {
            metadata: ObjectMeta::namespaced("default", "b1"),
            spec: BrokerSpec {
                endpoint: "http://b1.example:8080".to_string(),
                cloud_provider: CloudProvider::Aws,
                region: None,
                capabilities: vec![],
                health_check: None,
                priority: 100,
                max_concurrent_deployments: 10,
            },
            status: BrokerStatus {
                callback_public_key: public_key,
                ..Default::default()
            },
        }
    }

    fn make_resource(correlation: &str) -> ManagedResource {
        let mut resource = ManagedResource {
            metadata: ObjectMeta::namespaced("dev", "db1"),
            spec: ManagedResourceSpec {
                owner: None,
                engine: Engine::Postgresql,
                version: "16".to_string(),
                size: SizeClass::Small,
                target: None,
                backup: None,
                encryption: None,
                high_availability: false,
                parameters: Default::default(),
            },
            status: Default::default(),
        };
        resource.status.phase = ResourcePhase::Provisioning;
        resource.status.correlation_id = Some(correlation.to_string());
        resource
    }

    fn ready_callback(correlation: &str) -> CallbackRequest {
        CallbackRequest {
            deployment_id: correlation.to_string(),
            resource_type: "ManagedResource".to_string(),
            resource_name: "db1".to_string(),
            namespace: "dev".to_string(),
            status: CallbackStatus::Success,
            phase: "Ready".to_string(),
            message: "provisioned".to_string(),
            error: None,
            time: Utc::now(),
            endpoint: Some("db1.dev.example".to_string()),
            port: Some(5432),
            connection_secret: Some("db1-credentials".to_string()),
            additional_metadata: None,
            estimated_monthly_cost: Some(42.5),
        }
    }

    fn signed_headers(key: &SigningKey, body: &[u8], include_public: bool) -> HeaderMap {
        let timestamp = Utc::now().to_rfc3339();
        let mut headers = HeaderMap::new();
        headers.insert(BROKER_NAME_HEADER, "b1".parse().unwrap());
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            sign_payload(key, &timestamp, body).parse().unwrap(),
        );
        if include_public {
            headers.insert(
                PUBLIC_KEY_HEADER,
                encode_verifying_key(&key.verifying_key()).parse().unwrap(),
            );
        }
        headers
    }

    async fn post_callback(
        state: &AppState<MemoryStore>,
        key: &SigningKey,
        callback: &CallbackRequest,
        include_public: bool,
    ) -> Response {
        let body = serde_json::to_vec(callback).unwrap();
        let headers = signed_headers(key, &body, include_public);
        handle_callback(State(state.clone()), headers, Bytes::from(body)).await
    }

    #[tokio::test]
    async fn test_success_callback_applies_ready() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        let broker = make_broker(Some(encode_verifying_key(&key.verifying_key())));
        state.store.create(&broker).await.unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let response = post_callback(&state, &key, &ready_callback("d-1"), false).await;
        assert_eq!(response.status(), StatusCode::OK);

        let resource: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();
        assert_eq!(resource.status.phase, ResourcePhase::Ready);
        assert_eq!(resource.status.endpoint.as_deref(), Some("db1.dev.example"));
        assert_eq!(resource.status.port, Some(5432));
        assert_eq!(
            resource.status.connection_secret_ref.as_ref().unwrap().name,
            "db1-credentials"
        );
        assert_eq!(resource.status.cost.as_ref().unwrap().estimated_monthly, 42.5);
        let ready = find_condition(&resource.status.conditions, "Ready").unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "ProvisioningSucceeded");
    }

    #[tokio::test]
    async fn test_callback_is_idempotent() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let callback = ready_callback("d-1");
        let first = post_callback(&state, &key, &callback, false).await;
        assert_eq!(first.status(), StatusCode::OK);
        let after_first: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();

        let second = post_callback(&state, &key, &callback, false).await;
        assert_eq!(second.status(), StatusCode::OK);
        let after_second: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();

        assert_eq!(after_first.status.phase, after_second.status.phase);
        assert_eq!(after_first.status.endpoint, after_second.status.endpoint);
        assert_eq!(after_first.status.port, after_second.status.port);
        assert_eq!(
            find_condition(&after_first.status.conditions, "Ready")
                .unwrap()
                .last_transition_time,
            find_condition(&after_second.status.conditions, "Ready")
                .unwrap()
                .last_transition_time
        );
    }

    #[tokio::test]
    async fn test_wrong_key_rejected_without_mutation() {
        let state = make_state();
        let stored_key = SigningKey::from_bytes(&[1u8; 32]);
        let other_key = SigningKey::from_bytes(&[2u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(
                &stored_key.verifying_key(),
            ))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let response = post_callback(&state, &other_key, &ready_callback("d-1"), false).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let resource: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();
        assert_eq!(resource.status.phase, ResourcePhase::Provisioning);
        assert!(resource.status.endpoint.is_none());
    }

    #[tokio::test]
    async fn test_header_key_never_overwrites_stored() {
        let state = make_state();
        let stored_key = SigningKey::from_bytes(&[1u8; 32]);
        let other_key = SigningKey::from_bytes(&[2u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(
                &stored_key.verifying_key(),
            ))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        // Attacker signs with their own key and offers it in the header.
        let response = post_callback(&state, &other_key, &ready_callback("d-1"), true).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let broker: Broker = state.store.get(Some("default"), "b1").await.unwrap();
        assert_eq!(
            broker.status.callback_public_key.as_deref(),
            Some(encode_verifying_key(&stored_key.verifying_key()).as_str())
        );
    }

    #[tokio::test]
    async fn test_bootstrap_key_accepted_and_persisted() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state.store.create(&make_broker(None)).await.unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let response = post_callback(&state, &key, &ready_callback("d-1"), true).await;
        assert_eq!(response.status(), StatusCode::OK);

        let broker: Broker = state.store.get(Some("default"), "b1").await.unwrap();
        assert_eq!(
            broker.status.callback_public_key.as_deref(),
            Some(encode_verifying_key(&key.verifying_key()).as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();

        let body = serde_json::to_vec(&ready_callback("d-1")).unwrap();
        let response =
            handle_callback(State(state.clone()), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let body = serde_json::to_vec(&ready_callback("d-1")).unwrap();
        let stale = (Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        let mut headers = HeaderMap::new();
        headers.insert(BROKER_NAME_HEADER, "b1".parse().unwrap());
        headers.insert(TIMESTAMP_HEADER, stale.parse().unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            sign_payload(&key, &stale, &body).parse().unwrap(),
        );

        let response = handle_callback(State(state.clone()), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let resource: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();
        assert_eq!(resource.status.phase, ResourcePhase::Provisioning);
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_404() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();

        let response = post_callback(&state, &key, &ready_callback("d-ghost"), false).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shared_correlation_is_invariant_violation() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();
        let mut second = make_resource("d-1");
        second.metadata.name = "db2".to_string();
        state.store.create(&second).await.unwrap();

        let response = post_callback(&state, &key, &ready_callback("d-1"), false).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_late_failure_keeps_ready_phase() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let ready = ready_callback("d-1");
        assert_eq!(
            post_callback(&state, &key, &ready, false).await.status(),
            StatusCode::OK
        );

        let mut failure = ready_callback("d-1");
        failure.status = CallbackStatus::Failed;
        failure.phase = "Failed".to_string();
        failure.error = Some("backup job crashed".to_string());
        assert_eq!(
            post_callback(&state, &key, &failure, false).await.status(),
            StatusCode::OK
        );

        let resource: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();
        // Phase survives; the condition records the failure.
        assert_eq!(resource.status.phase, ResourcePhase::Ready);
        let condition = find_condition(&resource.status.conditions, "Ready").unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "ProvisioningFailed");
        assert!(condition.message.contains("backup job crashed"));
    }

    #[tokio::test]
    async fn test_in_progress_updates_message_without_conditions() {
        let state = make_state();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        state
            .store
            .create(&make_broker(Some(encode_verifying_key(&key.verifying_key()))))
            .await
            .unwrap();
        state.store.create(&make_resource("d-1")).await.unwrap();

        let mut progress = ready_callback("d-1");
        progress.status = CallbackStatus::InProgress;
        progress.phase = "Provisioning".to_string();
        progress.message = "creating volumes".to_string();
        assert_eq!(
            post_callback(&state, &key, &progress, false).await.status(),
            StatusCode::OK
        );

        let resource: ManagedResource = state.store.get(Some("dev"), "db1").await.unwrap();
        assert_eq!(resource.status.phase, ResourcePhase::Provisioning);
        assert_eq!(resource.status.message.as_deref(), Some("creating volumes"));
        assert!(resource.status.conditions.is_empty());
    }
}
