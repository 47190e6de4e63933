//! LLM provider adapters (spec §6 "LLM adapter contract").
//!
//! Every provider implements the same three operations so Stage 1 and the
//! repair loop (§4.F) never branch on provider identity. Grounded on the
//! teacher's `models/llm.rs` response-shape parsing (tool-call/finish-reason
//! extraction across OpenAI/Anthropic bodies) and `proxy/stream.rs`'s
//! chunk-reassembly idiom, adapted here to non-streaming completions.

pub mod anthropic;
pub mod fixtures;
pub mod openai;

use crate::config::{Config, LlmProvider};
use crate::graph::Graph;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DraftRequest {
    pub brief: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype_hint: Option<String>,
    pub seed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct DraftResult {
    pub graph: Graph,
    pub rationales: Vec<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestOptionsRequest {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub existing_options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SuggestOptionsResult {
    pub options: Vec<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RepairResult {
    pub graph: Graph,
    pub rationales: Vec<String>,
    pub usage: Usage,
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn draft_graph(&self, req: &DraftRequest) -> anyhow::Result<DraftResult>;
    async fn suggest_options(&self, req: &SuggestOptionsRequest) -> anyhow::Result<SuggestOptionsResult>;
    async fn repair_graph(&self, graph: &Graph, violations: &[Violation]) -> anyhow::Result<RepairResult>;
    fn name(&self) -> &'static str;
}

/// Default timeout for a single provider call (spec §4.E Stage 1).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Select the adapter for a request. A task-specific model override (e.g.
/// `CEE_MODEL_DRAFT`) can switch provider when its family requires a
/// different backend than the configured default (spec §6).
pub fn select_adapter(config: &Config, model_override: Option<&str>) -> Box<dyn LlmAdapter> {
    let provider = model_override
        .and_then(infer_provider_from_model)
        .unwrap_or(config.llm_provider);

    match provider {
        LlmProvider::Anthropic => Box::new(anthropic::AnthropicAdapter::new(
            config.anthropic_api_key.clone().unwrap_or_default(),
            model_override.unwrap_or(&config.llm_model).to_string(),
        )),
        LlmProvider::OpenAi => Box::new(openai::OpenAiAdapter::new(
            config.openai_api_key.clone().unwrap_or_default(),
            model_override.unwrap_or(&config.llm_model).to_string(),
        )),
        LlmProvider::Fixtures => Box::new(fixtures::FixtureAdapter::new()),
    }
}

fn infer_provider_from_model(model: &str) -> Option<LlmProvider> {
    if model.starts_with("claude") {
        Some(LlmProvider::Anthropic)
    } else if model.starts_with("gpt") || model.starts_with("o1") {
        Some(LlmProvider::OpenAi)
    } else {
        None
    }
}

/// Strip an optional fenced-code wrapper (```json ... ```` or ``` ... ```)
/// and parse the remainder as JSON. Grounded on the same markdown-fence
/// stripping idiom the teacher's guardrail module uses for schema
/// validation input (`middleware/guardrail.rs::extract_json_from_markdown`).
pub fn parse_json_loosely(raw: &str) -> anyhow::Result<serde_json::Value> {
    let trimmed = raw.trim();
    let candidate = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    };
    Ok(serde_json::from_str(candidate)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        let value = parse_json_loosely(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parses_bare_json() {
        let value = parse_json_loosely("{\"a\":2}").unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn infers_provider_from_model_family() {
        assert_eq!(infer_provider_from_model("claude-3-sonnet"), Some(LlmProvider::Anthropic));
        assert_eq!(infer_provider_from_model("gpt-4o"), Some(LlmProvider::OpenAi));
        assert_eq!(infer_provider_from_model("mystery-model"), None);
    }
}
