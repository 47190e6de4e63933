//! Boundary & error model (spec §4.H, §7).
//!
//! Canonical error envelope: `{schema, code, message, details, request_id, retryable}`.
//! Status mapping follows spec §6 exactly. Never echoes brief text, node
//! labels, or credentials.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A pure API-key rejection (missing HMAC involvement at all) — kept
    /// distinct from [`AppError::Forbidden`] so its detail key doesn't imply
    /// an HMAC failure happened (spec §4.C "unknown key → 403").
    #[error("api key rejected: {0}")]
    ApiKeyRejected(String),

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited { retry_after_seconds: u64 },

    #[error("graph invalid: {reason}")]
    GraphInvalid {
        reason: String,
        node_count: usize,
        edge_count: usize,
    },

    #[error("cee validation failed: {0}")]
    ValidationFailed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("timeout")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String, Value, bool) {
        match self {
            AppError::BadInput(msg) => (
                StatusCode::BAD_REQUEST,
                "error.v1",
                "BAD_INPUT",
                msg.clone(),
                json!({}),
                false,
            ),
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "error.v1",
                "UNAUTHENTICATED",
                "missing or invalid credentials".to_string(),
                json!({}),
                false,
            ),
            AppError::Forbidden(reason) => (
                StatusCode::FORBIDDEN,
                "error.v1",
                "FORBIDDEN",
                "request forbidden".to_string(),
                json!({ "hmac_error": reason }),
                false,
            ),
            AppError::ApiKeyRejected(reason) => (
                StatusCode::FORBIDDEN,
                "error.v1",
                "FORBIDDEN",
                "request forbidden".to_string(),
                json!({ "api_key_error": reason }),
                false,
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "error.v1",
                "NOT_FOUND",
                "resource not found".to_string(),
                json!({}),
                false,
            ),
            AppError::RateLimited {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "cee.error.v1",
                "CEE_RATE_LIMIT",
                "rate limit exceeded".to_string(),
                json!({ "retry_after_seconds": retry_after_seconds }),
                true,
            ),
            AppError::GraphInvalid {
                reason,
                node_count,
                edge_count,
            } => (
                StatusCode::BAD_REQUEST,
                "cee.error.v1",
                "CEE_GRAPH_INVALID",
                "generated graph failed validation".to_string(),
                json!({ "reason": reason, "node_count": node_count, "edge_count": edge_count }),
                false,
            ),
            AppError::ValidationFailed(detail) => (
                StatusCode::BAD_REQUEST,
                "cee.error.v1",
                "CEE_VALIDATION_FAILED",
                detail.clone(),
                json!({}),
                false,
            ),
            AppError::UpstreamUnavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "error.v1",
                "UPSTREAM_UNAVAILABLE",
                detail.clone(),
                json!({}),
                true,
            ),
            AppError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "error.v1",
                "TIMEOUT",
                "upstream call timed out".to_string(),
                json!({}),
                true,
            ),
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "error.v1",
                    "INTERNAL",
                    "internal server error".to_string(),
                    json!({}),
                    false,
                )
            }
        }
    }

    /// Render this error as the canonical envelope, attaching `request_id`.
    pub fn to_body(&self, request_id: &str) -> (StatusCode, Value) {
        let (status, schema, code, message, details, retryable) = self.parts();
        (
            status,
            json!({
                "schema": schema,
                "code": code,
                "message": message,
                "details": details,
                "request_id": request_id,
                "retryable": retryable,
            }),
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.to_body("unknown");
        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited {
            retry_after_seconds,
        } = &self
        {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert("retry-after", val);
            }
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("5"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429_with_retryable() {
        let err = AppError::RateLimited {
            retry_after_seconds: 12,
        };
        let (status, body) = err.to_body("req-1");
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "CEE_RATE_LIMIT");
        assert_eq!(body["retryable"], true);
        assert_eq!(body["details"]["retry_after_seconds"], 12);
    }

    #[test]
    fn graph_invalid_carries_counts() {
        let err = AppError::GraphInvalid {
            reason: "empty_graph".into(),
            node_count: 0,
            edge_count: 0,
        };
        let (status, body) = err.to_body("req-2");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "CEE_GRAPH_INVALID");
        assert_eq!(body["retryable"], false);
        assert_eq!(body["details"]["node_count"], 0);
    }

    #[test]
    fn forbidden_carries_hmac_error_detail() {
        let err = AppError::Forbidden("REPLAY_BLOCKED".into());
        let (status, body) = err.to_body("req-3");
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["details"]["hmac_error"], "REPLAY_BLOCKED");
    }

    #[test]
    fn api_key_rejected_carries_its_own_detail_key_not_hmac_error() {
        let err = AppError::ApiKeyRejected("UNKNOWN_KEY".into());
        let (status, body) = err.to_body("req-4");
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["details"]["api_key_error"], "UNKNOWN_KEY");
        assert!(body["details"].get("hmac_error").is_none());
    }
}
