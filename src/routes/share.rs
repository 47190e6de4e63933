//! Share-link store (spec §6 `/assist/share`, GET/DELETE `/assist/share/:token`).
//!
//! Out of scope as a numbered spec component, but named in the route table;
//! grounded on the teacher's in-process `cache.rs` local tier (`DashMap`
//! guarded map with a TTL) rather than the shared Redis path, since share
//! links are a convenience feature with no cross-instance consistency
//! requirement in spec.md.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_SHARE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct ShareEntry {
    response: serde_json::Value,
    expires_at: Instant,
}

pub struct ShareStore {
    entries: DashMap<String, ShareEntry>,
    ttl: Duration,
}

impl ShareStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn put(&self, response: serde_json::Value) -> String {
        let token = Uuid::new_v4().to_string();
        self.entries.insert(
            token.clone(),
            ShareEntry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    pub fn get(&self, token: &str) -> Option<serde_json::Value> {
        let entry = self.entries.get(token)?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.entries.remove(token);
            return None;
        }
        Some(entry.response.clone())
    }

    pub fn delete(&self, token: &str) -> bool {
        self.entries.remove(token).is_some()
    }

    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at >= now);
    }
}

impl Default for ShareStore {
    fn default() -> Self {
        Self::new(DEFAULT_SHARE_TTL)
    }
}
