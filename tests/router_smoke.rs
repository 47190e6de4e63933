//! Smoke tests for the assembled router (spec §6 route table): public
//! routes bypass auth, protected routes reject missing credentials, and a
//! valid draft-graph call round-trips through the full middleware stack.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use cee_gateway::auth::AuthState;
use cee_gateway::config::{Config, LlmProvider};
use cee_gateway::llm::fixtures::FixtureAdapter;
use cee_gateway::quota::{BucketParams, QuotaStore};
use cee_gateway::routes::share::ShareStore;
use cee_gateway::sse::Registry;
use cee_gateway::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        production: false,
        api_keys: vec!["test-key".to_string()],
        hmac_secret: None,
        hmac_max_skew: Duration::from_secs(300),
        redis_hmac_nonce_enabled: false,
        isl_base_url: None,
        isl_timeout: Duration::from_secs(5),
        isl_max_retries: 0,
        causal_validation_enabled: false,
        enable_legacy_sse: false,
        llm_provider: LlmProvider::Fixtures,
        llm_model: "fixtures".to_string(),
        model_draft: None,
        model_clarification: None,
        anthropic_api_key: None,
        openai_api_key: None,
        base_url: None,
        redis_url: "redis://127.0.0.1:6399".to_string(),
        default_rate_limit: 100,
        default_rate_limit_window_secs: 60,
        stream_rate_limit: 20,
    }
}

fn test_state() -> Arc<AppState> {
    let config = test_config();
    let quota = Arc::new(QuotaStore::new(
        None,
        BucketParams { capacity: 100.0, refill_per_sec: 100.0 },
        BucketParams { capacity: 20.0, refill_per_sec: 20.0 },
    ));
    let auth = Arc::new(AuthState {
        api_keys: config.api_keys.clone(),
        hmac_secret: config.hmac_secret.clone(),
        hmac_max_skew: config.hmac_max_skew,
        quota: quota.clone(),
        nonce_store: Arc::new(cee_gateway::auth::NonceStore::new_memory_only()),
        legacy_sse_enabled: config.enable_legacy_sse,
    });

    Arc::new(AppState {
        config,
        auth,
        quota,
        adapter: Arc::new(FixtureAdapter::new()),
        engine_client: None,
        streams: Arc::new(Registry::new(cee_gateway::sse::DEFAULT_RESUME_WINDOW)),
        shares: Arc::new(ShareStore::default()),
    })
}

#[tokio::test]
async fn healthz_is_reachable_without_credentials() {
    let app = cee_gateway::routes::router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn draft_graph_without_credentials_is_rejected() {
    let app = cee_gateway::routes::router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/assist/draft-graph")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"brief":"Should we buy or build?"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn draft_graph_with_valid_key_returns_ready_graph() {
    let app = cee_gateway::routes::router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/assist/draft-graph")
                .header("content-type", "application/json")
                .header("x-olumi-assist-key", "test-key")
                .body(Body::from(
                    r#"{"brief":"Should we buy a commercial CRM system or build our own?","seed":17}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["analysis_ready"]["status"], "ready");
    assert!(body["graph"].is_object());
}
