//! Startup registration: publish this broker's callback public key to
//! the manager so signed callbacks verify against the broker record.

use std::time::Duration;
use tracing::{info, warn};

const ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub async fn register_with_manager(
    manager_url: &str,
    join_token: &str,
    broker_name: &str,
    broker_namespace: &str,
    public_key: &str,
    version: &str,
) {
    let url = format!(
        "{}/v1/broker-register",
        manager_url.trim_end_matches('/')
    );
    let body = serde_json::json!({
        "name": broker_name,
        "namespace": broker_namespace,
        "publicKey": public_key,
        "version": version,
    });
    let client = reqwest::Client::new();

    for attempt in 1..=ATTEMPTS {
        let result = client
            .post(&url)
            .bearer_auth(join_token)
            .json(&body)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(
                    "Registered public key for {}/{} with manager",
                    broker_namespace, broker_name
                );
                return;
            }
            Ok(response) => {
                warn!(
                    "Registration attempt {}/{} rejected: {}",
                    attempt,
                    ATTEMPTS,
                    response.status()
                );
            }
            Err(e) => {
                warn!("Registration attempt {}/{} failed: {}", attempt, ATTEMPTS, e);
            }
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }

    // First-contact bootstrap via the callback public-key header still
    // lets callbacks through until registration succeeds.
    warn!(
        "Could not register with manager at {}; continuing without registration",
        manager_url
    );
}
