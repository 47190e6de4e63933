//! Per-key token-bucket quota store (spec §4.A).
//!
//! `tryConsume` derives a stable `keyId` from the caller's credential,
//! selects ordinary vs. stream bucket parameters, and attempts the shared
//! backend before silently falling back to the in-process one. The
//! fallback is silent to the caller but always logged once.

pub mod backend;

use backend::{MemoryBucketBackend, QuotaBackend};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Bucket sizing parameters; streams get a stricter capacity per spec §4.A.
#[derive(Debug, Clone, Copy)]
pub struct BucketParams {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    pub key_id: String,
    pub retry_after_seconds: u64,
    /// Bucket capacity at the time of this call — surfaced as `X-RateLimit-Limit`.
    pub limit: u64,
    /// Tokens left after this call, floored to an integer — surfaced as
    /// `X-RateLimit-Remaining`.
    pub remaining: u64,
}

pub struct QuotaStore {
    shared: Option<Arc<dyn QuotaBackend>>,
    fallback: Arc<MemoryBucketBackend>,
    ordinary: BucketParams,
    stream: BucketParams,
}

impl QuotaStore {
    pub fn new(
        shared: Option<Arc<dyn QuotaBackend>>,
        ordinary: BucketParams,
        stream: BucketParams,
    ) -> Self {
        Self {
            shared,
            fallback: Arc::new(MemoryBucketBackend::new()),
            ordinary,
            stream,
        }
    }

    /// Derive a short, stable, non-reversible id from a credential for use
    /// in telemetry. Never reveals the credential (spec §4.A).
    pub fn derive_key_id(credential: &[u8]) -> String {
        let digest = Sha256::digest(credential);
        hex::encode(&digest[..8])
    }

    pub async fn try_consume(&self, credential: &[u8], is_stream: bool) -> ConsumeOutcome {
        let key_id = Self::derive_key_id(credential);
        let params = if is_stream { self.stream } else { self.ordinary };
        let bucket_key = format!("quota:{}:{}", if is_stream { "stream" } else { "req" }, key_id);

        let result = if let Some(shared) = &self.shared {
            match shared.consume(&bucket_key, params.capacity, params.refill_per_sec).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(
                        event = "quota_backend_fallback",
                        backend_from = shared.name(),
                        backend_to = self.fallback.name(),
                        key_id = %key_id,
                        error = %e,
                        "shared quota backend unavailable, falling back to in-process bucket"
                    );
                    self.fallback
                        .consume(&bucket_key, params.capacity, params.refill_per_sec)
                        .await
                        .expect("in-process bucket backend is infallible")
                }
            }
        } else {
            self.fallback
                .consume(&bucket_key, params.capacity, params.refill_per_sec)
                .await
                .expect("in-process bucket backend is infallible")
        };

        let retry_after_seconds = if result.allowed {
            0
        } else {
            let deficit = (1.0 - result.tokens_remaining).max(0.0);
            ((deficit / params.refill_per_sec).ceil() as u64).max(1)
        };

        ConsumeOutcome {
            allowed: result.allowed,
            key_id,
            retry_after_seconds,
            limit: params.capacity as u64,
            remaining: result.tokens_remaining.max(0.0) as u64,
        }
    }
}
