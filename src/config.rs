//! Environment configuration.
//!
//! Every variable recognised by the service is read exactly once at startup
//! via [`load`]. No remote or file-based config source — same as the
//! teacher's `config.rs`, just a parse-with-fallback `env::var` ladder.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Gates the non-production frozen-graph snapshot check (spec §9
    /// "Frozen-graph enforcement") and engine-validation strictness.
    pub production: bool,

    // ── Auth ──────────────────────────────────────────────────
    pub api_keys: Vec<String>,
    pub hmac_secret: Option<String>,
    pub hmac_max_skew: Duration,
    pub redis_hmac_nonce_enabled: bool,

    // ── Downstream engine ─────────────────────────────────────
    pub isl_base_url: Option<String>,
    pub isl_timeout: Duration,
    pub isl_max_retries: u32,
    pub causal_validation_enabled: bool,

    // ── Streaming ─────────────────────────────────────────────
    pub enable_legacy_sse: bool,

    // ── LLM provider ──────────────────────────────────────────
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub model_draft: Option<String>,
    pub model_clarification: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,

    // ── Misc ──────────────────────────────────────────────────
    pub base_url: Option<String>,
    pub redis_url: String,

    // ── Quota ─────────────────────────────────────────────────
    pub default_rate_limit: u64,
    pub default_rate_limit_window_secs: u64,
    pub stream_rate_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
    Fixtures,
}

impl LlmProvider {
    fn parse(s: &str) -> Self {
        match s {
            "anthropic" => LlmProvider::Anthropic,
            "openai" => LlmProvider::OpenAi,
            _ => LlmProvider::Fixtures,
        }
    }
}

/// Clamp a parsed millisecond duration into `[min, max]`, falling back to
/// `default` when unset or unparsable.
fn clamped_ms(var: &str, min: u64, max: u64, default: u64) -> Duration {
    let raw = std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(raw.clamp(min, max))
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let mut api_keys: Vec<String> = std::env::var("ASSIST_API_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if let Ok(single) = std::env::var("ASSIST_API_KEY") {
        if !single.trim().is_empty() {
            api_keys.push(single.trim().to_string());
        }
    }

    let llm_max_retries: u32 = std::env::var("ISL_MAX_RETRIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
        .clamp(0, 5);

    Ok(Config {
        port: std::env::var("PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        production: std::env::var("ENVIRONMENT")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false),
        api_keys,
        hmac_secret: std::env::var("HMAC_SECRET").ok().filter(|s| !s.is_empty()),
        hmac_max_skew: clamped_ms("HMAC_MAX_SKEW_MS", 1_000, 3_600_000, 300_000),
        redis_hmac_nonce_enabled: std::env::var("REDIS_HMAC_NONCE_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true),
        isl_base_url: std::env::var("ISL_BASE_URL").ok().filter(|s| !s.is_empty()),
        isl_timeout: clamped_ms("ISL_TIMEOUT_MS", 100, 30_000, 5_000),
        isl_max_retries: llm_max_retries,
        causal_validation_enabled: std::env::var("CEE_CAUSAL_VALIDATION_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
        enable_legacy_sse: std::env::var("ENABLE_LEGACY_SSE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true),
        llm_provider: LlmProvider::parse(
            &std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "fixtures".into()),
        ),
        llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "default".into()),
        model_draft: std::env::var("CEE_MODEL_DRAFT").ok(),
        model_clarification: std::env::var("CEE_MODEL_CLARIFICATION").ok(),
        anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
        openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
        base_url: std::env::var("BASE_URL").ok(),
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
        default_rate_limit: std::env::var("ASSIST_DEFAULT_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600),
        default_rate_limit_window_secs: std::env::var("ASSIST_DEFAULT_RPM_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        stream_rate_limit: std::env::var("ASSIST_STREAM_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    })
}
