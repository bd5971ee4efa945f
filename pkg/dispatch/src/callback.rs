use chrono::Utc;
use ed25519_dalek::SigningKey;
use std::time::Duration;
use tracing::{info, warn};

use pkg_constants::dispatch::{CALLBACK_MAX_ATTEMPTS, CALLBACK_TIMEOUT_SECS};
use pkg_signing::{
    BROKER_NAME_HEADER, PUBLIC_KEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
    encode_verifying_key, sign_payload,
};

use crate::models::CallbackRequest;

/// Broker-side delivery of signed status callbacks to the control
/// plane. Retries with 1s/2s/4s backoff; each attempt is re-signed
/// with a fresh timestamp so retries stay inside the replay window.
pub struct CallbackSender {
    client: reqwest::Client,
    broker_name: String,
    key: SigningKey,
    /// Included on every send so first contact can bootstrap the key.
    public_key_b64: String,
    max_attempts: u32,
}

impl CallbackSender {
    pub fn new(broker_name: String, key: SigningKey) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CALLBACK_TIMEOUT_SECS))
            .user_agent("stratus-broker/0.1.0")
            .build()
            .expect("reqwest client construction cannot fail with static config");
        let public_key_b64 = encode_verifying_key(&key.verifying_key());
        Self {
            client,
            broker_name,
            key,
            public_key_b64,
            max_attempts: CALLBACK_MAX_ATTEMPTS,
        }
    }

    /// Send a status update to the manager's callback endpoint.
    pub async fn notify(&self, callback_url: &str, payload: &CallbackRequest) -> anyhow::Result<()> {
        let url = format!("{}/v1/callback", callback_url.trim_end_matches('/'));
        let body = serde_json::to_vec(payload)?;
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let backoff = Duration::from_secs(1 << (attempt - 1));
                warn!(
                    "Callback attempt {}/{} failed, retrying in {:?}",
                    attempt, self.max_attempts, backoff
                );
                tokio::time::sleep(backoff).await;
            }

            let timestamp = Utc::now().to_rfc3339();
            let signature = sign_payload(&self.key, &timestamp, &body);

            info!(
                "Sending callback to {} (attempt {}/{}): deploymentId={}, phase={}",
                url,
                attempt + 1,
                self.max_attempts,
                payload.deployment_id,
                payload.phase
            );

            let result = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header(BROKER_NAME_HEADER, &self.broker_name)
                .header(TIMESTAMP_HEADER, &timestamp)
                .header(SIGNATURE_HEADER, &signature)
                .header(PUBLIC_KEY_HEADER, &self.public_key_b64)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(
                        "Callback delivered: deploymentId={}, status={}",
                        payload.deployment_id,
                        response.status()
                    );
                    return Ok(());
                }
                Ok(response) => {
                    last_err = Some(anyhow::anyhow!(
                        "callback returned status {}",
                        response.status()
                    ));
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!("callback request failed: {}", e));
                }
            }
        }

        Err(anyhow::anyhow!(
            "callback failed after {} attempts: {}",
            self.max_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }
}
