//! Request edge: public-route bypass, two-phase auth, quota (spec §4.C).
//!
//! Grounded on the teacher's `admin_auth` middleware (`api/mod.rs`) for the
//! constant-time key comparison idiom, and the `request_id_middleware` /
//! `security_headers_middleware` pair in `main.rs` for the header-stamping
//! shape. Generalised here into a two-phase `axum::middleware::from_fn_with_state`
//! pair: `capture_and_select` (early phase, runs before body extraction) and
//! `authenticate` (late phase, runs after the handler has the parsed body —
//! implemented as a second middleware layered just inside routing so it still
//! sees the raw bytes cached by phase 1).

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::AppError;
use crate::quota::QuotaStore;

use super::hmac::{HmacFailure, HmacVerifier};
use super::nonce::NonceStore;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Attached to the request after successful authentication (spec §3).
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub key_id: String,
    pub hmac_auth: bool,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
    pub rate_limit: RateLimitInfo,
}

/// Quota snapshot taken at auth time, surfaced as `X-RateLimit-*` response
/// headers by `routes::headers::response_headers` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after_seconds: u64,
}

pub struct AuthState {
    pub api_keys: Vec<String>,
    pub hmac_secret: Option<String>,
    pub hmac_max_skew: Duration,
    pub quota: Arc<QuotaStore>,
    pub nonce_store: Arc<NonceStore>,
    pub legacy_sse_enabled: bool,
}

fn is_public_route(method: &Method, path: &str) -> bool {
    match path {
        "/healthz" | "/health" | "/" | "/v1/status" => true,
        _ => {
            if let Some(_rest) = path.strip_prefix("/assist/share/") {
                matches!(*method, Method::GET | Method::DELETE)
            } else {
                path.starts_with("/admin")
            }
        }
    }
}

fn is_legacy_sse_bypass(state: &AuthState, method: &Method, path: &str, headers: &HeaderMap) -> bool {
    if state.legacy_sse_enabled {
        return false;
    }
    let wants_event_stream = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);
    *method == Method::POST && path == "/assist/draft-graph" && wants_event_stream
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("x-olumi-assist-key").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

/// Single combined middleware implementing both auth phases. The teacher
/// splits request-id/security-headers into two separate `from_fn` layers;
/// here both auth phases must share the captured body, so they live in one
/// closure over an explicit `AuthState`.
pub async fn authenticate(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let headers = req.headers().clone();

    if is_public_route(&method, &path) || is_legacy_sse_bypass(&state, &method, &path, &headers) {
        return Ok(next.run(req).await);
    }

    let signature = header_str(&headers, "x-olumi-signature");
    let use_hmac = signature.is_some() && state.hmac_secret.is_some();

    let source_ip = client_ip(&headers);
    let user_agent = header_str(&headers, "user-agent").map(str::to_string);
    let correlation_id = header_str(&headers, "x-correlation-id").map(str::to_string);

    let ctx = if use_hmac {
        let secret = state.hmac_secret.as_deref().expect("checked by use_hmac");
        let (parts, body) = req.into_parts();
        let bytes = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| AppError::BadInput("body too large or unreadable".into()))?;

        let verifier = HmacVerifier::new(secret, state.hmac_max_skew);
        let timestamp = header_str(&parts.headers, "x-olumi-timestamp");
        let nonce = header_str(&parts.headers, "x-olumi-nonce");

        let verify_result = verifier
            .verify(
                &state.nonce_store,
                parts.method.as_str(),
                parts.uri.path(),
                &bytes,
                signature,
                timestamp,
                nonce,
            )
            .await;

        req = Request::from_parts(parts, Body::from(bytes));

        match verify_result {
            Ok(verified) => {
                if verified.legacy {
                    tracing::info!(event = "hmac_legacy_format_used", path = %path);
                }
                let outcome = state.quota.try_consume(secret.as_bytes(), is_stream_path(&path)).await;
                if !outcome.allowed {
                    return Err(AppError::RateLimited {
                        retry_after_seconds: outcome.retry_after_seconds,
                    });
                }
                CallerContext {
                    key_id: outcome.key_id,
                    hmac_auth: true,
                    source_ip,
                    user_agent,
                    correlation_id,
                    rate_limit: RateLimitInfo {
                        limit: outcome.limit,
                        remaining: outcome.remaining,
                        reset_after_seconds: outcome.retry_after_seconds,
                    },
                }
            }
            Err(failure) => {
                if state.api_keys.is_empty() {
                    return Err(AppError::Forbidden(failure.code().to_string()));
                }
                // Propagate whatever the API-key fallback actually produced —
                // it may be a legitimate `RateLimited`/`Unauthenticated`, not
                // necessarily a rejection caused by the failed HMAC attempt.
                authenticate_with_api_key(&state, &headers, source_ip, user_agent, correlation_id, &path).await?
            }
        }
    } else {
        authenticate_with_api_key(&state, &headers, source_ip, user_agent, correlation_id, &path).await?
    };

    tracing::info!(
        event = "auth_success",
        key_id = %ctx.key_id,
        hmac_auth = ctx.hmac_auth,
        "request authenticated"
    );

    req.extensions_mut().insert(ctx.clone());
    let mut resp = next.run(req).await;
    // Response extensions are a separate map from the request's; the caller
    // context has to be re-attached here so `routes::headers::response_headers`
    // (which only sees the response on the way back out) can read the
    // rate-limit snapshot for `X-RateLimit-*`.
    resp.extensions_mut().insert(ctx);
    Ok(resp)
}

async fn authenticate_with_api_key(
    state: &AuthState,
    headers: &HeaderMap,
    source_ip: Option<String>,
    user_agent: Option<String>,
    correlation_id: Option<String>,
    path: &str,
) -> Result<CallerContext, AppError> {
    let key = extract_api_key(headers).ok_or(AppError::Unauthenticated)?;

    let known = state
        .api_keys
        .iter()
        .any(|configured| ct_eq(configured, &key));
    if !known {
        return Err(AppError::ApiKeyRejected("UNKNOWN_KEY".into()));
    }

    let outcome = state.quota.try_consume(key.as_bytes(), is_stream_path(path)).await;
    if !outcome.allowed {
        return Err(AppError::RateLimited {
            retry_after_seconds: outcome.retry_after_seconds,
        });
    }

    Ok(CallerContext {
        key_id: outcome.key_id,
        hmac_auth: false,
        source_ip,
        user_agent,
        correlation_id,
        rate_limit: RateLimitInfo {
            limit: outcome.limit,
            remaining: outcome.remaining,
            reset_after_seconds: outcome.retry_after_seconds,
        },
    })
}

fn is_stream_path(path: &str) -> bool {
    path.ends_with("/stream") || path.contains("draft-graph/stream")
}

/// Constant-time string comparison, same pattern the teacher uses for admin
/// key checks (`api/mod.rs::ct_eq`), generalised to arbitrary API keys.
fn ct_eq(a: &str, b: &str) -> bool {
    use sha2::{Digest, Sha256};
    use subtle::ConstantTimeEq;
    let hash_a = Sha256::digest(a.as_bytes());
    let hash_b = Sha256::digest(b.as_bytes());
    hash_a.ct_eq(&hash_b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_routes_match_exactly() {
        assert!(is_public_route(&Method::GET, "/healthz"));
        assert!(is_public_route(&Method::GET, "/health"));
        assert!(is_public_route(&Method::GET, "/"));
        assert!(is_public_route(&Method::GET, "/v1/status"));
        assert!(!is_public_route(&Method::GET, "/assist/draft-graph"));
    }

    #[test]
    fn share_prefix_is_public_for_get_and_delete_only() {
        assert!(is_public_route(&Method::GET, "/assist/share/abc123"));
        assert!(is_public_route(&Method::DELETE, "/assist/share/abc123"));
        assert!(!is_public_route(&Method::POST, "/assist/share/abc123"));
    }

    #[test]
    fn admin_prefix_is_public() {
        assert!(is_public_route(&Method::GET, "/admin/keys"));
    }

    #[test]
    fn api_key_extraction_prefers_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-olumi-assist-key", "key-a".parse().unwrap());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer key-b".parse().unwrap(),
        );
        assert_eq!(extract_api_key(&headers), Some("key-a".to_string()));
    }

    #[test]
    fn api_key_extraction_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer key-b".parse().unwrap(),
        );
        assert_eq!(extract_api_key(&headers), Some("key-b".to_string()));
    }

    #[test]
    fn stream_paths_are_detected() {
        assert!(is_stream_path("/assist/draft-graph/stream"));
        assert!(!is_stream_path("/assist/draft-graph"));
    }

    #[test]
    fn ct_eq_matches_equal_strings_and_rejects_others() {
        assert!(ct_eq("same", "same"));
        assert!(!ct_eq("same", "different"));
    }
}
