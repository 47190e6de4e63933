//! HTTP handlers (spec §6 route table).
//!
//! Grounded on the teacher's `api/` handler modules for the
//! extract-state/call-collaborator/map-error shape, generalised here to the
//! pipeline/SSE/share collaborators this service actually has.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::graph::{Graph, NodeKind};
use crate::llm::SuggestOptionsRequest;
use crate::pipeline::{PipelineDeps, PipelineRequest, PipelineResponse};
use crate::sse::gate::EventClass;
use crate::sse::ring::{EventKind, StreamEvent};
use crate::sse::wire;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DraftGraphBody {
    pub brief: String,
    #[serde(default)]
    pub archetype_hint: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn root() -> &'static str {
    "cee-gateway"
}

pub async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cee",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn run_pipeline(state: &AppState, req: DraftGraphBody) -> Result<PipelineResponse, AppError> {
    let model_name = state
        .config
        .model_draft
        .clone()
        .unwrap_or_else(|| state.config.llm_model.clone());

    let deps = PipelineDeps {
        adapter: state.adapter.as_ref(),
        engine_client: state.engine_client.as_deref(),
        require_engine: state.config.causal_validation_enabled,
        production: state.config.production,
        model_name,
        max_repair_retries: None,
    };

    crate::pipeline::run(
        PipelineRequest {
            brief: req.brief,
            seed: req.seed,
            archetype_hint: req.archetype_hint,
        },
        &deps,
    )
    .await
}

/// `POST /assist/draft-graph` — the one route the request edge's narrow
/// legacy-SSE bypass can reach unauthenticated, so this handler (not the
/// edge middleware) owns the 426 migration response.
pub async fn draft_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let wants_event_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    if wants_event_stream && !state.config.enable_legacy_sse {
        let body = serde_json::json!({
            "schema": "error.v1",
            "code": "UPGRADE_REQUIRED",
            "message": "legacy SSE on this endpoint is disabled; use POST /assist/draft-graph/stream",
            "details": { "migrate_to": "/assist/draft-graph/stream" },
            "request_id": "unknown",
            "retryable": false,
        });
        return Ok((StatusCode::UPGRADE_REQUIRED, Json(body)).into_response());
    }

    let req: DraftGraphBody = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadInput(format!("invalid request body: {e}")))?;
    let response = run_pipeline(&state, req).await?;
    Ok(Json(response).into_response())
}

/// `POST /assist/draft-graph/stream` — runs the pipeline in a background
/// task and relays its checkpoints as `stage` events, terminating with a
/// `COMPLETE` event carrying the full response and the ring's trim count
/// (spec §4.D). The pipeline itself has no per-stage callback, so the
/// checkpoints already recorded in `trace.checkpoints` are replayed as the
/// stream's stage events once the run finishes — a simplification noted in
/// `DESIGN.md`.
pub async fn draft_graph_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DraftGraphBody>,
) -> Response {
    let (stream_id, entry) = state.streams.create_stream();
    let resume_token = state.streams.issue_resume_token(&stream_id, &entry);

    let writer = entry.clone();
    let state_for_task = state.clone();
    tokio::spawn(async move {
        match run_pipeline(&state_for_task, req).await {
            Ok(response) => {
                for checkpoint in &response.trace.checkpoints {
                    writer.push(
                        EventKind::Stage,
                        serde_json::json!({
                            "stage": checkpoint.stage_name,
                            "node_count": checkpoint.node_count,
                            "edge_count": checkpoint.edge_count,
                        }),
                    );
                }
                writer.push(
                    EventKind::Stage,
                    serde_json::json!({
                        "stage": "COMPLETE",
                        "diagnostics": { "trims": writer.trims() },
                        "response": response,
                    }),
                );
            }
            Err(err) => {
                let (status, body) = err.to_body("unknown");
                state_for_task.streams.record_event(EventClass::from_status(status));
                writer.push(
                    EventKind::Stage,
                    serde_json::json!({
                        "stage": "COMPLETE",
                        "diagnostics": { "trims": writer.trims() },
                        "error": body,
                    }),
                );
            }
        }
        writer.mark_completed();
        state_for_task.streams.record_stream_completion(writer.trims() > 0);
    });

    let rx = entry.subscribe();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-resume-token", resume_token)
        .body(Body::from_stream(live_event_stream(rx)))
        .expect("static response parts are valid")
}

/// `POST /assist/draft-graph/resume?mode=live` (spec §4.D "Resume"). The
/// `mode` query parameter and `X-Resume-Mode` header are accepted per the
/// spec's request shape but `live` is the only mode this implementation
/// supports — token lookup alone determines the resume outcome.
pub async fn resume_stream(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, AppError> {
    let token = headers
        .get("x-resume-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadInput("missing X-Resume-Token header".to_string()))?;

    match state.streams.resume(token) {
        Ok((replay, live, _completed)) => {
            let replayed = stream::iter(
                replay
                    .into_iter()
                    .map(|event| Ok::<_, std::io::Error>(axum::body::Bytes::from(wire::encode(&event)))),
            );
            let body = match live {
                Some(rx) => Body::from_stream(replayed.chain(live_event_stream(rx))),
                None => Body::from_stream(replayed),
            };
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .expect("static response parts are valid"))
        }
        Err(crate::sse::ResumeError::UnknownToken) => {
            let err = AppError::NotFound;
            state.streams.record_event(EventClass::from_status(err.to_body("unknown").0));
            Err(err)
        }
        Err(crate::sse::ResumeError::ReplayTooLate) => {
            let err = AppError::BadInput("REPLAY_TOO_LATE".to_string());
            state.streams.record_event(EventClass::from_status(err.to_body("unknown").0));
            Err(err)
        }
    }
}

/// Interleave live broadcast events with heartbeat ticks (spec §4.D
/// "heartbeat every N seconds"), stopping once a `COMPLETE` stage event is
/// observed. Grounded on the cancellation/suspension-point pattern in
/// spec.md §5 — a single `tokio::select!` per step, no polling loop.
fn live_event_stream(
    rx: broadcast::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<axum::body::Bytes, std::io::Error>> {
    struct State {
        rx: broadcast::Receiver<StreamEvent>,
        interval: tokio::time::Interval,
        done: bool,
    }

    let state = State {
        rx,
        interval: tokio::time::interval(crate::sse::HEARTBEAT_INTERVAL),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        tokio::select! {
            biased;
            received = state.rx.recv() => match received {
                Ok(event) => {
                    let is_complete = event
                        .payload
                        .get("stage")
                        .and_then(|v| v.as_str())
                        == Some("COMPLETE");
                    state.done = is_complete;
                    let bytes = axum::body::Bytes::from(wire::encode(&event));
                    Some((Ok(bytes), state))
                }
                Err(broadcast::error::RecvError::Closed) => None,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    Some((Ok(axum::body::Bytes::from(wire::encode_heartbeat())), state))
                }
            },
            _ = state.interval.tick() => {
                Some((Ok(axum::body::Bytes::from(wire::encode_heartbeat())), state))
            }
        }
    })
}

#[derive(Debug, Deserialize)]
pub struct SuggestOptionsBody {
    pub goal: String,
    #[serde(default)]
    pub constraints: Option<String>,
    #[serde(default)]
    pub existing_options: Vec<String>,
}

/// `POST /assist/v1/options` (spec §6 "Pipeline variants").
pub async fn suggest_options(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SuggestOptionsBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req = SuggestOptionsRequest {
        goal: body.goal,
        constraints: body.constraints,
        existing_options: body.existing_options,
    };
    let result = state
        .adapter
        .suggest_options(&req)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(serde_json::json!({ "options": result.options })))
}

#[derive(Debug, Deserialize)]
pub struct ExplainGraphBody {
    pub graph: Graph,
}

/// `POST /assist/v1/explain-graph` — a deterministic structural summary, not
/// an LLM call; the spec names this as one of the "Pipeline variants" without
/// a contract, so it is implemented as a lightweight derived-text helper
/// (documented in `DESIGN.md`).
pub async fn explain_graph(Json(body): Json<ExplainGraphBody>) -> Json<serde_json::Value> {
    let graph = body.graph;
    let goal_label = graph
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Goal)
        .map(|n| n.label.clone());
    let decision_count = graph.nodes.iter().filter(|n| n.kind == NodeKind::Decision).count();
    let outcome_count = graph.nodes.iter().filter(|n| n.kind == NodeKind::Outcome).count();

    let summary = match goal_label {
        Some(goal) => format!(
            "This graph analyzes \"{goal}\" across {decision_count} decision(s), {} option(s), and {outcome_count} outcome(s).",
            graph.options.len()
        ),
        None => "This graph has no goal node.".to_string(),
    };

    Json(serde_json::json!({
        "summary": summary,
        "node_count": graph.nodes.len(),
        "edge_count": graph.edges.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EvidenceHelperBody {
    pub claim: String,
}

/// `POST /assist/v1/evidence-helper` — like `explain_graph`, a lightweight
/// deterministic helper rather than an LLM round-trip.
pub async fn evidence_helper(Json(body): Json<EvidenceHelperBody>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "claim_length": body.claim.len(),
        "suggested_evidence_types": [
            "internal historical data",
            "comparable case studies",
            "domain expert review",
        ],
    }))
}

/// `POST /assist/share` — stores an arbitrary JSON response body and returns
/// a share token.
pub async fn create_share(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let token = state.shares.put(body);
    Json(serde_json::json!({ "token": token }))
}

pub async fn get_share(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.shares.get(&token).map(Json).ok_or(AppError::NotFound)
}

pub async fn delete_share(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.shares.delete(&token) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

