use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use pkg_constants::dispatch::DISPATCH_TIMEOUT_SECS;

use crate::models::{
    DeprovisionRequest, DeprovisionResponse, ProvisionRequest, ProvisionResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Timeouts, connection failures: retried by the work queue.
    #[error("broker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx from the broker. 4xx is permanent for this attempt.
    #[error("broker returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("failed to decode broker response: {0}")]
    Decode(String),
}

impl DispatchError {
    /// True for failures that retrying will not fix (broker 4xx).
    pub fn is_permanent(&self) -> bool {
        matches!(self, DispatchError::Status { code, .. } if (400..500).contains(code))
    }
}

/// Outbound provision/deprovision calls to a broker. A trait so
/// reconciler tests can substitute a recording double.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn provision(
        &self,
        endpoint: &str,
        request: &ProvisionRequest,
    ) -> Result<ProvisionResponse, DispatchError>;

    async fn deprovision(
        &self,
        endpoint: &str,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, DispatchError>;
}

/// HTTP dispatcher used in production.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DISPATCH_TIMEOUT_SECS))
            .user_agent("stratus-manager/0.1.0")
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { client }
    }

    async fn post_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        url: String,
        request: &Req,
    ) -> Result<Resp, DispatchError> {
        debug!("Dispatching POST {}", url);
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Status {
                code: status.as_u16(),
                body,
            });
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| DispatchError::Decode(e.to_string()))
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn provision(
        &self,
        endpoint: &str,
        request: &ProvisionRequest,
    ) -> Result<ProvisionResponse, DispatchError> {
        let url = format!("{}/v1/provision", endpoint.trim_end_matches('/'));
        self.post_json(url, request).await
    }

    async fn deprovision(
        &self,
        endpoint: &str,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, DispatchError> {
        let url = format!("{}/v1/deprovision", endpoint.trim_end_matches('/'));
        self.post_json(url, request).await
    }
}
