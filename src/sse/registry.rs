//! Per-stream registry: owns the ring for each in-flight stream, issues and
//! resolves resume tokens (spec §4.D "Resume").
//!
//! Grounded on spec §9 "Per-stream writer/reader": each stream is modelled
//! as a single writer owning a bounded queue; a resume replays a snapshot of
//! the ring taken under a short lock, then hands off to a live continuation
//! via a broadcast channel — readers never mutate the ring.

use super::gate::{EventClass, FailFastGate};
use super::ring::{EventKind, Ring, StreamEvent, DEFAULT_CAPACITY};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct StreamEntry {
    ring: std::sync::Mutex<Ring>,
    tx: broadcast::Sender<StreamEvent>,
    completed: AtomicBool,
    created_at: Instant,
}

impl StreamEntry {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            ring: std::sync::Mutex::new(Ring::new(DEFAULT_CAPACITY)),
            tx,
            completed: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Writer-side: push a new event and broadcast it to live subscribers.
    pub fn push(&self, kind: EventKind, payload: serde_json::Value) -> StreamEvent {
        let event = {
            let mut ring = self.ring.lock().expect("ring mutex poisoned");
            ring.push(kind, payload)
        };
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn trims(&self) -> u64 {
        self.ring.lock().expect("ring mutex poisoned").trims()
    }

    pub fn events_since(&self, since: Option<u64>) -> Vec<StreamEvent> {
        self.ring.lock().expect("ring mutex poisoned").events_since(since)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.ring.lock().expect("ring mutex poisoned").last_seq()
    }
}

/// Build a deterministic terminal `COMPLETE` event for a resume that has
/// nothing left in the ring to replay. `seq` is one past whichever is
/// greater of the ring's own last seq or the token's issuance point, so the
/// invariant "resumed events have seq strictly greater than the token's
/// lastSeq" holds even when the ring is completely empty.
fn synthesize_terminal_event(entry: &StreamEntry, last_seq_at_issuance: Option<u64>) -> StreamEvent {
    let seq = entry
        .last_seq()
        .into_iter()
        .chain(last_seq_at_issuance)
        .max()
        .map(|s| s + 1)
        .unwrap_or(0);
    StreamEvent {
        seq,
        kind: EventKind::Stage,
        payload: serde_json::json!({
            "stage": "COMPLETE",
            "diagnostics": { "trims": entry.trims() },
            "synthesized": true,
        }),
    }
}

struct ResumeTokenInfo {
    stream_id: String,
    last_seq_at_issuance: Option<u64>,
    issued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeError {
    UnknownToken,
    ReplayTooLate,
}

pub struct Registry {
    streams: DashMap<String, Arc<StreamEntry>>,
    tokens: DashMap<String, ResumeTokenInfo>,
    resume_window: Duration,
    gate: std::sync::Mutex<FailFastGate>,
}

/// How long a stream stays registered after completion, so a resume
/// request can still attach to its tail (spec §5 "the ring is retained for
/// a resume window before eviction").
pub const DEFAULT_RESUME_WINDOW: Duration = Duration::from_secs(180);

impl Registry {
    pub fn new(resume_window: Duration) -> Self {
        Self {
            streams: DashMap::new(),
            tokens: DashMap::new(),
            resume_window,
            gate: std::sync::Mutex::new(FailFastGate::new(super::gate::DEFAULT_WINDOW)),
        }
    }

    /// Record this stream's completion against the fail-fast gate (spec
    /// §4.D "Gates") and warn once the rolling window crosses threshold —
    /// called by the writer task right after `mark_completed`.
    pub fn record_stream_completion(&self, trimmed: bool) {
        let mut gate = self.gate.lock().expect("gate mutex poisoned");
        gate.record_stream_completion(trimmed);
        if gate.should_fail_fast() {
            tracing::warn!(event = "sse_fail_fast_gate_tripped", stats = ?gate.stats(), "resume/trim thresholds breached");
        }
    }

    /// Tally a transport error, resume 4xx, or origin 5xx observed on a
    /// stream/resume call (spec §4.D "Event classification") — warns once
    /// the rolling window crosses a fail-fast threshold, same as every
    /// other gate-feeding call.
    pub fn record_event(&self, class: EventClass) {
        let mut gate = self.gate.lock().expect("gate mutex poisoned");
        gate.record_event(class);
        if gate.should_fail_fast() {
            tracing::warn!(event = "sse_fail_fast_gate_tripped", stats = ?gate.stats(), "resume/trim thresholds breached");
        }
    }

    pub fn create_stream(&self) -> (String, Arc<StreamEntry>) {
        let stream_id = Uuid::new_v4().to_string();
        let entry = Arc::new(StreamEntry::new());
        self.streams.insert(stream_id.clone(), entry.clone());
        (stream_id, entry)
    }

    /// Issue a resume token bound to `stream_id` at its current tail
    /// sequence. Called at writer checkpoints (spec §4.D "resume" events).
    pub fn issue_resume_token(&self, stream_id: &str, entry: &StreamEntry) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(
            token.clone(),
            ResumeTokenInfo {
                stream_id: stream_id.to_string(),
                last_seq_at_issuance: entry.last_seq(),
                issued_at: Instant::now(),
            },
        );
        token
    }

    /// Resolve a resume request: replay buffered events after the token's
    /// `lastSeq`, then hand back a live receiver if the stream is still
    /// producing. Never fabricates events for trimmed gaps (spec §4.D).
    ///
    /// If the stream has already completed and nothing is left in the ring
    /// to replay (its terminal event got trimmed, or the writer finished
    /// without anything buffered after the token's issuance point), this
    /// synthesises a terminal `COMPLETE` event deterministically instead of
    /// failing the resume outright (spec §4.D "or fail with a
    /// replay-too-late error" is the last resort, not the default — OQ2).
    /// `ReplayTooLate` is now reserved for the case where the stream itself
    /// has already been swept out of the registry (spec §5 resume window).
    pub fn resume(
        &self,
        token: &str,
    ) -> Result<(Vec<StreamEvent>, Option<broadcast::Receiver<StreamEvent>>, bool), ResumeError> {
        let started = Instant::now();
        let result = self.resume_inner(token);
        let mut gate = self.gate.lock().expect("gate mutex poisoned");
        gate.record_resume(result.is_ok(), started.elapsed());
        if gate.should_fail_fast() {
            tracing::warn!(event = "sse_fail_fast_gate_tripped", stats = ?gate.stats(), "resume/trim thresholds breached");
        }
        result
    }

    fn resume_inner(
        &self,
        token: &str,
    ) -> Result<(Vec<StreamEvent>, Option<broadcast::Receiver<StreamEvent>>, bool), ResumeError> {
        let info = self.tokens.get(token).ok_or(ResumeError::UnknownToken)?;
        let entry = self.streams.get(&info.stream_id).ok_or(ResumeError::ReplayTooLate)?;

        let replay = entry.events_since(info.last_seq_at_issuance);

        if entry.is_completed() {
            if replay.is_empty() {
                let synthetic = synthesize_terminal_event(&entry, info.last_seq_at_issuance);
                return Ok((vec![synthetic], None, true));
            }
            return Ok((replay, None, true));
        }

        let live = entry.subscribe();
        Ok((replay, Some(live), false))
    }

    pub fn sweep_expired(&self) {
        let cutoff = Instant::now() - self.resume_window;
        self.streams.retain(|_, entry| entry.created_at >= cutoff || !entry.is_completed());
        self.tokens.retain(|_, info| info.issued_at >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resume_unknown_token_is_rejected() {
        let registry = Registry::new(DEFAULT_RESUME_WINDOW);
        let result = registry.resume("no-such-token");
        assert_eq!(result.unwrap_err(), ResumeError::UnknownToken);
    }

    #[tokio::test]
    async fn resume_replays_events_after_issuance_point() {
        let registry = Registry::new(DEFAULT_RESUME_WINDOW);
        let (stream_id, entry) = registry.create_stream();
        entry.push(EventKind::Stage, json!({"n": 1}));
        let token = registry.issue_resume_token(&stream_id, &entry);
        entry.push(EventKind::Stage, json!({"n": 2}));
        entry.push(EventKind::Stage, json!({"n": 3}));

        let (replay, live, completed) = registry.resume(&token).unwrap();
        assert_eq!(replay.len(), 2);
        assert!(live.is_some());
        assert!(!completed);
    }

    #[tokio::test]
    async fn resume_after_completion_replays_tail_once() {
        let registry = Registry::new(DEFAULT_RESUME_WINDOW);
        let (stream_id, entry) = registry.create_stream();
        let token = registry.issue_resume_token(&stream_id, &entry);
        entry.push(EventKind::Stage, json!({"n": 1}));
        entry.mark_completed();

        let (replay, live, completed) = registry.resume(&token).unwrap();
        assert_eq!(replay.len(), 1);
        assert!(live.is_none());
        assert!(completed);
    }

    #[tokio::test]
    async fn resume_with_nothing_left_to_replay_synthesizes_terminal_event() {
        let registry = Registry::new(DEFAULT_RESUME_WINDOW);
        let (stream_id, entry) = registry.create_stream();
        entry.push(EventKind::Stage, json!({"n": 1}));
        let token = registry.issue_resume_token(&stream_id, &entry);
        entry.mark_completed();

        let (replay, live, completed) = registry.resume(&token).unwrap();
        assert!(live.is_none());
        assert!(completed);
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].payload["stage"], "COMPLETE");
        assert_eq!(replay[0].payload["synthesized"], true);
        assert!(replay[0].payload["diagnostics"]["trims"].is_u64());
        assert!(replay[0].seq > 0);
    }

    #[tokio::test]
    async fn resume_of_stream_swept_from_registry_is_replay_too_late() {
        let registry = Registry::new(DEFAULT_RESUME_WINDOW);
        let (stream_id, entry) = registry.create_stream();
        entry.push(EventKind::Stage, json!({"n": 1}));
        let token = registry.issue_resume_token(&stream_id, &entry);
        entry.mark_completed();
        // Simulate the stream having aged out of the resume window while the
        // token itself is still on file — the one case `resume` still fails.
        registry.streams.remove(&stream_id);

        let result = registry.resume(&token);
        assert_eq!(result.unwrap_err(), ResumeError::ReplayTooLate);
    }
}
