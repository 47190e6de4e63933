//! Response header emission (spec §6 "Response headers emitted").
//!
//! A single `axum::middleware::from_fn` layer, mirroring the teacher's
//! `request_id_middleware`/`security_headers_middleware` pair in `main.rs`
//! collapsed into one layer since every header here is stamped the same way
//! (read-next, mutate-response). Also patches the `request_id` field of
//! error envelopes: `errors::AppError` has no access to per-request state,
//! so it serialises a placeholder which this layer replaces with the real
//! id — but only for buffered JSON error bodies, never for `text/event-stream`
//! responses, which must stream untouched.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::{CallerContext, RateLimitInfo};

const MAX_ERROR_BODY_BYTES: usize = 1024 * 1024;

/// Per-request id, generated (or carried over from `X-Correlation-Id`) by
/// this layer and attached to the request's extensions so handlers could
/// read it if they ever need to; today only this layer consumes it.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn response_headers(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    let is_error = response.status().is_client_error() || response.status().is_server_error();
    if is_error && is_json(&response) {
        response = patch_request_id(response, &request_id).await;
    }

    let rate_limit = response.extensions().get::<CallerContext>().map(|c| c.rate_limit);
    stamp_headers(&mut response, &request_id, rate_limit);
    response
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

async fn patch_request_id(response: Response, request_id: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_ERROR_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let patched = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|mut value| {
            let obj = value.as_object_mut()?;
            if obj.get("request_id").and_then(|v| v.as_str()) == Some("unknown") {
                obj.insert("request_id".to_string(), serde_json::Value::String(request_id.to_string()));
            }
            Some(value)
        });

    let body = match patched {
        Some(value) => Body::from(serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec())),
        None => Body::from(bytes),
    };

    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, body)
}

fn stamp_headers(response: &mut Response, request_id: &str, rate_limit: Option<RateLimitInfo>) {
    let headers = response.headers_mut();

    insert(headers, "x-request-id", request_id);
    insert(headers, "x-cee-request-id", request_id);
    insert(headers, "x-olumi-service", "cee");
    insert(
        headers,
        "x-olumi-service-build",
        option_env!("GIT_COMMIT").unwrap_or("dev"),
    );
    insert(headers, "x-cee-api-version", "3.0");
    insert(headers, "x-cee-feature-version", env!("CARGO_PKG_VERSION"));

    if let Some(rl) = rate_limit {
        insert(headers, "x-ratelimit-limit", &rl.limit.to_string());
        insert(headers, "x-ratelimit-remaining", &rl.remaining.to_string());
        insert(headers, "x-ratelimit-reset", &rl.reset_after_seconds.to_string());
    }

    insert(
        headers,
        "strict-transport-security",
        "max-age=63072000; includeSubDomains",
    );
    insert(headers, "x-content-type-options", "nosniff");
    insert(headers, "x-frame-options", "SAMEORIGIN");
    insert(headers, "cross-origin-resource-policy", "cross-origin");
    headers.remove("server");
}

fn insert(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(val) = HeaderValue::from_str(value) {
        headers.insert(name, val);
    }
}
