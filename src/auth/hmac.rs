//! HMAC verifier (spec §4.B).
//!
//! Canonical string: `METHOD\nPATH\nTIMESTAMP\nNONCE\nsha256(body)` (new
//! format) or `METHOD\nPATH\nsha256(body)` (legacy, no timestamp/nonce).
//! Comparison is constant-time. Nonces are checked against a dual-backend
//! replay store mirroring `quota::backend`'s shared/fallback split.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::auth::nonce::NonceStore;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacFailure {
    NoSecret,
    MissingSignature,
    InvalidSignature,
    SignatureSkew,
    ReplayBlocked,
}

impl HmacFailure {
    pub fn code(&self) -> &'static str {
        match self {
            HmacFailure::NoSecret => "NO_SECRET",
            HmacFailure::MissingSignature => "MISSING_SIGNATURE",
            HmacFailure::InvalidSignature => "INVALID_SIGNATURE",
            HmacFailure::SignatureSkew => "SIGNATURE_SKEW",
            HmacFailure::ReplayBlocked => "REPLAY_BLOCKED",
        }
    }
}

pub struct VerifiedRequest {
    pub legacy: bool,
}

pub struct HmacVerifier<'a> {
    pub secret: &'a str,
    pub max_skew: std::time::Duration,
}

impl<'a> HmacVerifier<'a> {
    pub fn new(secret: &'a str, max_skew: std::time::Duration) -> Self {
        Self { secret, max_skew }
    }

    /// Verify a request. `timestamp`/`nonce` are `None` when the client used
    /// the legacy (no-replay-protection) signature format.
    pub async fn verify(
        &self,
        nonce_store: &NonceStore,
        method: &str,
        path: &str,
        body: &[u8],
        signature_hex: Option<&str>,
        timestamp: Option<&str>,
        nonce: Option<&str>,
    ) -> Result<VerifiedRequest, HmacFailure> {
        if self.secret.is_empty() {
            return Err(HmacFailure::NoSecret);
        }
        let signature_hex = signature_hex.ok_or(HmacFailure::MissingSignature)?;

        let body_hash = hex::encode(Sha256::digest(body));

        let (canonical, legacy) = match (timestamp, nonce) {
            (Some(ts), Some(nc)) => {
                let ts_val: f64 = ts.parse().map_err(|_| HmacFailure::SignatureSkew)?;
                if !ts_val.is_finite() || ts_val <= 0.0 {
                    return Err(HmacFailure::SignatureSkew);
                }
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64();
                let skew = (now - ts_val).abs();
                if skew > self.max_skew.as_secs_f64() {
                    return Err(HmacFailure::SignatureSkew);
                }
                (
                    format!("{method}\n{path}\n{ts}\n{nc}\n{body_hash}"),
                    false,
                )
            }
            _ => (format!("{method}\n{path}\n{body_hash}"), true),
        };

        let expected = self.sign(&canonical);
        let provided = hex::decode(signature_hex).map_err(|_| HmacFailure::InvalidSignature)?;
        if expected.ct_eq(&provided).unwrap_u8() != 1 {
            return Err(HmacFailure::InvalidSignature);
        }

        if !legacy {
            let nc = nonce.expect("nonce present in non-legacy branch");
            let ttl = self.max_skew * 2;
            if nonce_store.check_and_insert(nc, ttl).await {
                return Err(HmacFailure::ReplayBlocked);
            }
        }

        Ok(VerifiedRequest { legacy })
    }

    fn sign(&self, canonical: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Compute the hex-encoded signature for `canonical` — used by tests and
    /// by any first-party client helper that needs to sign a request.
    pub fn sign_hex(&self, canonical: &str) -> String {
        hex::encode(self.sign(canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn verifier() -> HmacVerifier<'static> {
        HmacVerifier::new("top-secret", Duration::from_secs(300))
    }

    #[tokio::test]
    async fn legacy_format_is_accepted_and_flagged() {
        let v = verifier();
        let store = NonceStore::new_memory_only();
        let body = b"{}";
        let body_hash = hex::encode(Sha256::digest(body));
        let canonical = format!("POST\n/assist/draft-graph\n{body_hash}");
        let sig = v.sign_hex(&canonical);

        let result = v
            .verify(&store, "POST", "/assist/draft-graph", body, Some(&sig), None, None)
            .await
            .unwrap();
        assert!(result.legacy);
    }

    #[tokio::test]
    async fn new_format_rejects_replayed_nonce() {
        let v = verifier();
        let store = NonceStore::new_memory_only();
        let body = b"{}";
        let body_hash = hex::encode(Sha256::digest(body));
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();
        let ts = now.to_string();
        let nonce = "nonce-1";
        let canonical = format!("POST\n/p\n{ts}\n{nonce}\n{body_hash}");
        let sig = v.sign_hex(&canonical);

        let first = v
            .verify(&store, "POST", "/p", body, Some(&sig), Some(&ts), Some(nonce))
            .await;
        assert!(first.is_ok());

        let second = v
            .verify(&store, "POST", "/p", body, Some(&sig), Some(&ts), Some(nonce))
            .await;
        assert_eq!(second.unwrap_err(), HmacFailure::ReplayBlocked);
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected_as_skew() {
        let v = verifier();
        let store = NonceStore::new_memory_only();
        let body = b"{}";
        let body_hash = hex::encode(Sha256::digest(body));
        let old_ts = "1000000000"; // long in the past
        let canonical = format!("POST\n/p\n{old_ts}\n{}\n{body_hash}", "n");
        let sig = v.sign_hex(&canonical);

        let result = v
            .verify(&store, "POST", "/p", body, Some(&sig), Some(old_ts), Some("n"))
            .await;
        assert_eq!(result.unwrap_err(), HmacFailure::SignatureSkew);
    }

    #[tokio::test]
    async fn tampered_body_invalidates_signature() {
        let v = verifier();
        let store = NonceStore::new_memory_only();
        let body_hash = hex::encode(Sha256::digest(b"original"));
        let canonical = format!("POST\n/p\n{body_hash}");
        let sig = v.sign_hex(&canonical);

        let result = v
            .verify(&store, "POST", "/p", b"tampered", Some(&sig), None, None)
            .await;
        assert_eq!(result.unwrap_err(), HmacFailure::InvalidSignature);
    }

    #[tokio::test]
    async fn missing_signature_header_is_reported() {
        let v = verifier();
        let store = NonceStore::new_memory_only();
        let result = v.verify(&store, "POST", "/p", b"{}", None, None, None).await;
        assert_eq!(result.unwrap_err(), HmacFailure::MissingSignature);
    }

    #[tokio::test]
    async fn empty_secret_reports_no_secret() {
        let v = HmacVerifier::new("", Duration::from_secs(300));
        let store = NonceStore::new_memory_only();
        let result = v.verify(&store, "POST", "/p", b"{}", Some("ab"), None, None).await;
        assert_eq!(result.unwrap_err(), HmacFailure::NoSecret);
    }
}
