//! Nonce replay store backing [`super::hmac::HmacVerifier`].
//!
//! Same dual-backend shape as `quota::backend`: a shared Redis `SET ...
//! NX EX` tier tried first, falling back to an in-process `DashMap` with
//! manual expiry sweeps. `check_and_insert` returns `true` when the nonce
//! was already present (i.e. the request is a replay).

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
trait NonceBackend: Send + Sync {
    /// Returns `true` if `nonce` was already recorded (replay).
    async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> anyhow::Result<bool>;
    fn name(&self) -> &'static str;
}

struct RedisNonceBackend {
    conn: ConnectionManager,
    call_timeout: Duration,
}

#[async_trait]
impl NonceBackend for RedisNonceBackend {
    async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let key = format!("hmac:nonce:{nonce}");
        let fut = async {
            let set: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(set.is_none())
        };
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("redis nonce check timed out"))?
            .map_err(anyhow::Error::from)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

struct MemoryNonceBackend {
    seen: DashMap<String, Instant>,
}

impl MemoryNonceBackend {
    fn new() -> Self {
        Self { seen: DashMap::new() }
    }

    fn sweep(&self, now: Instant) {
        self.seen.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl NonceBackend for MemoryNonceBackend {
    async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        if self.seen.len() > 10_000 {
            self.sweep(now);
        }
        let expires_at = now + ttl;
        match self.seen.entry(nonce.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok(*entry.get() > now),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NonceStore {
    shared: Option<Arc<dyn NonceBackend>>,
    fallback: Arc<MemoryNonceBackend>,
}

impl NonceStore {
    pub fn new(conn: Option<ConnectionManager>, call_timeout: Duration) -> Self {
        Self {
            shared: conn.map(|c| {
                Arc::new(RedisNonceBackend {
                    conn: c,
                    call_timeout,
                }) as Arc<dyn NonceBackend>
            }),
            fallback: Arc::new(MemoryNonceBackend::new()),
        }
    }

    pub fn new_memory_only() -> Self {
        Self {
            shared: None,
            fallback: Arc::new(MemoryNonceBackend::new()),
        }
    }

    /// Returns `true` if `nonce` has already been seen within its ttl.
    pub async fn check_and_insert(&self, nonce: &str, ttl: Duration) -> bool {
        if let Some(shared) = &self.shared {
            match shared.check_and_insert(nonce, ttl).await {
                Ok(replay) => return replay,
                Err(e) => {
                    tracing::warn!(
                        event = "nonce_backend_fallback",
                        backend_from = shared.name(),
                        backend_to = self.fallback.name(),
                        error = %e,
                        "shared nonce backend unavailable, falling back to in-process store"
                    );
                }
            }
        }
        self.fallback
            .check_and_insert(nonce, ttl)
            .await
            .expect("in-process nonce backend is infallible")
    }
}
