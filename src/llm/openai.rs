//! OpenAI adapter. Same retry-client shape as [`super::anthropic`], pointed
//! at the Chat Completions API.

use super::{
    parse_json_loosely, DraftRequest, DraftResult, LlmAdapter, RepairResult, SuggestOptionsRequest,
    SuggestOptionsResult, Usage, Violation,
};
use crate::graph::Graph;
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiAdapter {
    client: ClientWithMiddleware,
    api_key: String,
    model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, model: String) -> Self {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(super::DEFAULT_CALL_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self { client, api_key, model }
    }

    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<(String, Usage)> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("openai request failed: {e}"))?;

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("openai response parse failed: {e}"))?;

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("openai response missing choices[0].message.content"))?
            .to_string();

        let usage = Usage {
            prompt_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok((text, usage))
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    async fn draft_graph(&self, req: &DraftRequest) -> anyhow::Result<DraftResult> {
        let system = "Return only a JSON object with keys nodes, edges, options describing a decision graph.";
        let user = format!("Brief: {}\nSeed: {}", req.brief, req.seed);
        let (text, usage) = self.complete(system, &user).await?;
        let value = parse_json_loosely(&text)?;
        let graph: Graph = serde_json::from_value(value)?;
        Ok(DraftResult {
            graph,
            rationales: vec![],
            usage,
        })
    }

    async fn suggest_options(&self, req: &SuggestOptionsRequest) -> anyhow::Result<SuggestOptionsResult> {
        let system = "Return only a JSON object with key \"options\": an array of short strings.";
        let user = format!("Goal: {}", req.goal);
        let (text, usage) = self.complete(system, &user).await?;
        let value = parse_json_loosely(&text)?;
        let options: Vec<String> = serde_json::from_value(value["options"].clone())?;
        Ok(SuggestOptionsResult { options, usage })
    }

    async fn repair_graph(&self, graph: &Graph, violations: &[Violation]) -> anyhow::Result<RepairResult> {
        let system = "Repair the following decision graph JSON so it addresses every listed violation. Return only the corrected JSON object.";
        let violations_block = violations
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{}. [{}] {}", i + 1, v.code, v.message))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Graph:\n{}\n\nViolations:\n{violations_block}",
            serde_json::to_string(graph)?
        );
        let (text, usage) = self.complete(system, &user).await?;
        let value = parse_json_loosely(&text)?;
        let repaired: Graph = serde_json::from_value(value)?;
        Ok(RepairResult {
            graph: repaired,
            rationales: vec![],
            usage,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
