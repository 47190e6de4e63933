//! HTTP routing (spec §4.H/§6 "External interfaces: I. External-interface
//! glue"). Wires every path in spec.md §6's table and layers the request
//! edge, CORS, tracing, and body-size middleware the way the teacher's
//! `run_server` assembles its router in `main.rs`.

pub mod handlers;
pub mod headers;
pub mod share;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::state::AppState;

/// Request bodies here are pipeline briefs and share payloads, not file
/// uploads — a much tighter cap than the teacher's generic 25 MB proxy limit.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let auth_state = state.auth.clone();

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/health", get(handlers::healthz))
        .route("/", get(handlers::root))
        .route("/v1/status", get(handlers::status))
        .route("/assist/draft-graph", post(handlers::draft_graph))
        .route("/assist/draft-graph/stream", post(handlers::draft_graph_stream))
        .route("/assist/draft-graph/resume", post(handlers::resume_stream))
        .route("/assist/v1/draft-graph", post(handlers::draft_graph))
        .route("/assist/v1/options", post(handlers::suggest_options))
        .route("/assist/v1/explain-graph", post(handlers::explain_graph))
        .route("/assist/v1/evidence-helper", post(handlers::evidence_helper))
        .route("/assist/share", post(handlers::create_share))
        .route(
            "/assist/share/:token",
            get(handlers::get_share).delete(handlers::delete_share),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(middleware::from_fn_with_state(auth_state, auth::authenticate))
        .layer(middleware::from_fn(headers::response_headers))
}

/// Restricts CORS origins the same way the teacher's `main.rs` does (reads
/// `DASHBOARD_ORIGIN`, defaults to localhost for dev), extended with the
/// HMAC/resume headers this service's clients send.
fn cors_layer() -> CorsLayer {
    let dashboard_origin =
        std::env::var("DASHBOARD_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == dashboard_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-olumi-assist-key"),
            HeaderName::from_static("x-olumi-signature"),
            HeaderName::from_static("x-olumi-timestamp"),
            HeaderName::from_static("x-olumi-nonce"),
            HeaderName::from_static("x-resume-token"),
            HeaderName::from_static("x-resume-mode"),
            HeaderName::from_static("x-correlation-id"),
        ])
        .allow_credentials(true)
}
