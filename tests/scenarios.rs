//! End-to-end coverage for the named scenarios (S1-S6), exercised through
//! the same collaborators the HTTP handlers use rather than fabricated
//! expectations — each test drives `pipeline::run`, the request edge
//! middleware, or the SSE registry directly.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;

use cee_gateway::auth::{self, AuthState, HmacVerifier, NonceStore};
use cee_gateway::graph::{Edge, Graph, Node, NodeKind};
use cee_gateway::llm::fixtures::{FixtureAdapter, EMPTY_GRAPH_MARKER};
use cee_gateway::llm::{DraftRequest, DraftResult, LlmAdapter, RepairResult, SuggestOptionsRequest, SuggestOptionsResult, Usage, Violation};
use cee_gateway::pipeline::{self, PipelineDeps, PipelineRequest};
use cee_gateway::quota::{BucketParams, QuotaStore};
use cee_gateway::sse::ring::EventKind;
use cee_gateway::sse::Registry;
use std::collections::BTreeMap;

fn fixture_deps(adapter: &FixtureAdapter) -> PipelineDeps<'_> {
    PipelineDeps {
        adapter,
        engine_client: None,
        require_engine: false,
        production: false,
        model_name: "fixtures".to_string(),
        max_repair_retries: None,
    }
}

/// S1 — buy-vs-build draft.
#[tokio::test]
async fn s1_buy_vs_build_draft_is_ready_with_options_and_outcome() {
    let adapter = FixtureAdapter::new();
    let req = PipelineRequest {
        brief: "Should we buy a commercial CRM system or build our own? We need to launch within 6 months with a budget of $200k.".to_string(),
        seed: Some(17),
        archetype_hint: None,
    };
    let response = pipeline::run(req, &fixture_deps(&adapter)).await.unwrap();

    assert_eq!(response.analysis_ready.status, "ready");
    let graph = response.graph.as_ref().expect("ready response carries a graph");
    assert_eq!(graph.nodes.iter().filter(|n| n.kind == NodeKind::Goal).count(), 1);
    assert_eq!(graph.nodes.iter().filter(|n| n.kind == NodeKind::Decision).count(), 1);
    assert!(graph.options.len() >= 2);
    assert!(graph.nodes.iter().filter(|n| n.kind == NodeKind::Outcome).count() >= 1);
    assert_eq!(graph.default_seed, 17);
    assert!(response.weight_suggestions.is_none());
}

/// An adapter that drafts a graph containing a self-loop on node
/// `999-invalid`, triggering Stage 2/4's `CYCLE_DETECTED` structural error
/// — the way an upstream draft referencing an unresolved/malformed id would
/// surface as a blocked response (spec S2).
struct BrokenGraphAdapter;

#[async_trait::async_trait]
impl LlmAdapter for BrokenGraphAdapter {
    async fn draft_graph(&self, _req: &DraftRequest) -> anyhow::Result<DraftResult> {
        let graph = Graph {
            nodes: vec![
                Node {
                    id: "goal-1".into(),
                    kind: NodeKind::Goal,
                    label: "Goal".into(),
                    body: None,
                    suggested_position: None,
                    observed_state: None,
                    extra: BTreeMap::new(),
                },
                Node {
                    id: "999-invalid".into(),
                    kind: NodeKind::Decision,
                    label: "Malformed upstream node".into(),
                    body: None,
                    suggested_position: None,
                    observed_state: None,
                    extra: BTreeMap::new(),
                },
            ],
            edges: vec![Edge {
                id: "self-loop".into(),
                from: "999-invalid".into(),
                to: "999-invalid".into(),
                exists_probability: 1.0,
                belief: None,
                strength: 1.0,
                strength_std: None,
                effect_direction: cee_gateway::graph::EffectDirection::None,
                provenance: None,
                extra: BTreeMap::new(),
            }],
            options: vec![],
            ..Default::default()
        };
        Ok(DraftResult {
            graph,
            rationales: vec![],
            usage: Usage::default(),
        })
    }

    async fn suggest_options(&self, _req: &SuggestOptionsRequest) -> anyhow::Result<SuggestOptionsResult> {
        Ok(SuggestOptionsResult { options: vec![], usage: Usage::default() })
    }

    async fn repair_graph(&self, graph: &Graph, _violations: &[Violation]) -> anyhow::Result<RepairResult> {
        Ok(RepairResult { graph: graph.clone(), rationales: vec![], usage: Usage::default() })
    }

    fn name(&self) -> &'static str {
        "broken-fixture"
    }
}

/// S2 — blocked validation.
#[tokio::test]
async fn s2_invalid_upstream_node_produces_blocked_response() {
    let adapter = BrokenGraphAdapter;
    let req = PipelineRequest {
        brief: "Any brief".to_string(),
        seed: Some(1),
        archetype_hint: None,
    };
    let response = pipeline::run(req, &fixture_deps_for(&adapter)).await.unwrap();

    assert_eq!(response.analysis_ready.status, "blocked");
    assert!(response.graph.is_none());
    assert!(response.nodes.is_empty());
    assert!(response.edges.is_empty());
    assert_eq!(response.analysis_ready.blockers[0].code, "validation_failure");
}

fn fixture_deps_for(adapter: &BrokenGraphAdapter) -> PipelineDeps<'_> {
    PipelineDeps {
        adapter,
        engine_client: None,
        require_engine: false,
        production: false,
        model_name: "fixtures".to_string(),
        max_repair_retries: None,
    }
}

/// S3 — empty graph.
#[tokio::test]
async fn s3_empty_draft_is_rejected_with_graph_invalid_error() {
    let adapter = FixtureAdapter::new();
    let req = PipelineRequest {
        brief: format!("{EMPTY_GRAPH_MARKER} please"),
        seed: Some(1),
        archetype_hint: None,
    };
    let err = pipeline::run(req, &fixture_deps(&adapter)).await.unwrap_err();

    let (status, body) = err.to_body("req-s3");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["schema"], "cee.error.v1");
    assert_eq!(body["code"], "CEE_GRAPH_INVALID");
    assert_eq!(body["retryable"], false);
    assert_eq!(body["details"]["reason"], "empty_graph");
    assert_eq!(body["details"]["node_count"], 0);
    assert_eq!(body["details"]["edge_count"], 0);
}

fn minimal_auth_state(
    api_keys: Vec<String>,
    hmac_secret: Option<String>,
    quota: Arc<QuotaStore>,
) -> Arc<AuthState> {
    Arc::new(AuthState {
        api_keys,
        hmac_secret,
        hmac_max_skew: Duration::from_secs(300),
        quota,
        nonce_store: Arc::new(NonceStore::new_memory_only()),
        legacy_sse_enabled: true,
    })
}

fn protected_router(auth_state: Arc<AuthState>) -> Router {
    Router::new()
        .route("/protected", get(|| async { "ok" }).post(|| async { "ok" }))
        .layer(axum::middleware::from_fn_with_state(auth_state, auth::authenticate))
}

/// S4 — rate limit.
#[tokio::test]
async fn s4_exceeding_configured_rpm_returns_429_with_retry_after() {
    let quota = Arc::new(QuotaStore::new(
        None,
        BucketParams { capacity: 1.0, refill_per_sec: 0.0 },
        BucketParams { capacity: 1.0, refill_per_sec: 0.0 },
    ));
    let auth_state = minimal_auth_state(vec!["test-key".to_string()], None, quota);
    let app = protected_router(auth_state);

    let request = || {
        Request::builder()
            .method("GET")
            .uri("/protected")
            .header("x-olumi-assist-key", "test-key")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = second
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap();
    assert!(retry_after > 0);

    let bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "CEE_RATE_LIMIT");
    assert!(body["details"]["retry_after_seconds"].as_u64().unwrap() > 0);
}

/// S5 — HMAC replay.
#[tokio::test]
async fn s5_replayed_nonce_is_blocked_on_second_request() {
    let secret = "shared-secret".to_string();
    let quota = Arc::new(QuotaStore::new(
        None,
        BucketParams { capacity: 100.0, refill_per_sec: 100.0 },
        BucketParams { capacity: 100.0, refill_per_sec: 100.0 },
    ));
    // No configured API keys: a failed HMAC verification (replay included)
    // goes straight to 403 instead of falling back to key auth.
    let auth_state = minimal_auth_state(vec![], Some(secret.clone()), quota);
    let app = protected_router(auth_state);

    let body_bytes = b"{}";
    let body_hash = hex::encode(<sha2::Sha256 as sha2::Digest>::digest(body_bytes));
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
        .to_string();
    let nonce = "replay-nonce-1";
    let canonical = format!("POST\n/protected\n{ts}\n{nonce}\n{body_hash}");
    let verifier = HmacVerifier::new(&secret, Duration::from_secs(300));
    let signature = verifier.sign_hex(&canonical);

    let request = || {
        Request::builder()
            .method("POST")
            .uri("/protected")
            .header("x-olumi-signature", signature.as_str())
            .header("x-olumi-timestamp", ts.as_str())
            .header("x-olumi-nonce", nonce)
            .body(Body::from(body_bytes.to_vec()))
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::FORBIDDEN);
    let bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["details"]["hmac_error"], "REPLAY_BLOCKED");
}

/// S6 — SSE resume: disconnect after seq K with a resume token, reconnect
/// in live mode (stream still running), observe events after K, then the
/// writer finishes and the live receiver sees the terminal `COMPLETE` event.
#[tokio::test]
async fn s6_resume_in_live_mode_replays_tail_then_completes() {
    let registry = Registry::new(cee_gateway::sse::DEFAULT_RESUME_WINDOW);
    let (stream_id, entry) = registry.create_stream();

    entry.push(EventKind::Stage, serde_json::json!({"stage": "DRAFT"}));
    let seq_k = entry.push(EventKind::Stage, serde_json::json!({"stage": "NORMALIZE"})).seq;
    let token = registry.issue_resume_token(&stream_id, &entry);

    // Simulates events produced between the client's disconnect and its
    // reconnect: buffered in the ring, so the replay picks them up too.
    entry.push(EventKind::Stage, serde_json::json!({"stage": "ENRICH"}));

    let (replay, live, completed) = registry.resume(&token).unwrap();
    assert!(replay.iter().all(|e| e.seq > seq_k));
    assert!(!completed);
    let mut live = live.expect("stream still producing events, resume must hand back a live receiver");

    entry.push(EventKind::Stage, serde_json::json!({
        "stage": "COMPLETE",
        "diagnostics": { "trims": entry.trims() },
    }));
    entry.mark_completed();

    let completion = live.recv().await.expect("live receiver observes the completion event");
    assert!(completion.seq > seq_k);
    assert_eq!(completion.payload["stage"], "COMPLETE");
    assert!(completion.payload["diagnostics"]["trims"].is_u64());
}
