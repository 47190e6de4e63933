//! External engine client for `engine_validation` (spec §4.G stage 5) and
//! Stage 4's optional causal validation (`CEE_CAUSAL_VALIDATION_ENABLED`).
//!
//! Grounded on the teacher's `UpstreamClient` (`proxy/upstream.rs`):
//! reqwest-middleware client with exponential-backoff retries, here scoped
//! to a single `POST /validate` call instead of generic request forwarding.

use crate::graph::Graph;
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EngineViolation {
    pub code: String,
    pub message: String,
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn validate(&self, graph: &Graph) -> anyhow::Result<Vec<EngineViolation>>;
}

pub struct HttpEngineClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpEngineClient {
    pub fn new(base_url: String, timeout: Duration, max_retries: u32) -> Self {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self { client, base_url }
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn validate(&self, graph: &Graph) -> anyhow::Result<Vec<EngineViolation>> {
        let url = format!("{}/validate", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(graph)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("engine validate call failed: {e}"))?;

        #[derive(serde::Deserialize)]
        struct EngineResponse {
            #[serde(default)]
            violations: Vec<EngineViolation>,
        }
        let parsed: EngineResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("engine response parse failed: {e}"))?;
        Ok(parsed.violations)
    }
}

/// Fixture engine client: never reports violations, used when
/// `ISL_BASE_URL` is unset so verification still completes deterministically.
pub struct NullEngineClient;

#[async_trait]
impl EngineClient for NullEngineClient {
    async fn validate(&self, _graph: &Graph) -> anyhow::Result<Vec<EngineViolation>> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_engine_client_reports_no_violations() {
        let client = NullEngineClient;
        let violations = client.validate(&Graph::default()).await.unwrap();
        assert!(violations.is_empty());
    }
}
