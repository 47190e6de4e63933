//! Dual-backend token bucket storage (spec §4.A, design note "Cache + fallback").
//!
//! Grounded on the teacher's `TieredCache` (`cache.rs`): a local in-process
//! tier backed by a shared tier, with the shared tier's Lua `INCR`+`EXPIRE`
//! pattern generalised here into an atomic refill-then-consume script.
//! `RedisBucketBackend` is tried first with a short timeout; any failure
//! (connection error, timeout) falls through to `MemoryBucketBackend` and
//! the caller logs exactly one fallback telemetry event per call.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a single atomic refill-then-consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeResult {
    pub allowed: bool,
    /// Tokens remaining after this call (post-consume if allowed).
    pub tokens_remaining: f64,
}

#[async_trait]
pub trait QuotaBackend: Send + Sync {
    /// Atomically refill then attempt to consume one token from `key`'s
    /// bucket, returning the post-call token count either way.
    async fn consume(
        &self,
        key: &str,
        capacity: f64,
        refill_per_sec: f64,
    ) -> anyhow::Result<ConsumeResult>;

    fn name(&self) -> &'static str;
}

/// Redis-backed bucket: state lives in a Redis hash `{tokens, last_refill}`,
/// mutated by a single Lua script so concurrent callers linearise per key
/// (spec §4.A: "two concurrent requests... must not both succeed").
pub struct RedisBucketBackend {
    conn: ConnectionManager,
    call_timeout: Duration,
}

impl RedisBucketBackend {
    pub fn new(conn: ConnectionManager, call_timeout: Duration) -> Self {
        Self { conn, call_timeout }
    }
}

const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_per_sec = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local state = redis.call("HMGET", key, "tokens", "last_refill")
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + elapsed * refill_per_sec)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call("HMSET", key, "tokens", tokens, "last_refill", now)
redis.call("EXPIRE", key, 3600)

return {allowed, tostring(tokens)}
"#;

#[async_trait]
impl QuotaBackend for RedisBucketBackend {
    async fn consume(
        &self,
        key: &str,
        capacity: f64,
        refill_per_sec: f64,
    ) -> anyhow::Result<ConsumeResult> {
        let mut conn = self.conn.clone();
        let now = now_secs_f64();
        let script = redis::Script::new(BUCKET_SCRIPT);

        let fut = script
            .key(key)
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(now)
            .invoke_async::<_, (i64, String)>(&mut conn);

        let (allowed, tokens_str) = tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("redis bucket call timed out"))??;

        Ok(ConsumeResult {
            allowed: allowed == 1,
            tokens_remaining: tokens_str.parse().unwrap_or(0.0),
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

struct MemoryBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// In-process fallback: one bucket per key, guarded by lock striping via
/// `DashMap`'s internal sharding (same approach as the teacher's local
/// `DashMap` cache tier).
pub struct MemoryBucketBackend {
    buckets: DashMap<String, Mutex<MemoryBucketState>>,
}

impl MemoryBucketBackend {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }
}

impl Default for MemoryBucketBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaBackend for MemoryBucketBackend {
    async fn consume(
        &self,
        key: &str,
        capacity: f64,
        refill_per_sec: f64,
    ) -> anyhow::Result<ConsumeResult> {
        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(MemoryBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            })
        });
        let mut state = entry.lock().expect("bucket mutex poisoned");

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;

        let allowed = if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        };

        Ok(ConsumeResult {
            allowed,
            tokens_remaining: state.tokens,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn now_secs_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
