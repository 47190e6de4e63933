//! Bounded per-stream event ring (spec §4.D "Ring & trim").
//!
//! Single writer, many readers. The writer owns the ring exclusively;
//! readers only ever see snapshots taken under a short lock (spec §9
//! "Per-stream writer/reader" — never share mutable buffers without
//! synchronisation).

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stage,
    Resume,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub seq: u64,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct Ring {
    capacity: usize,
    events: VecDeque<StreamEvent>,
    next_seq: u64,
    trims: u64,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            next_seq: 0,
            trims: 0,
        }
    }

    /// Append a new event with the next sequence number, trimming the
    /// oldest entry if the ring is full.
    pub fn push(&mut self, kind: EventKind, payload: serde_json::Value) -> StreamEvent {
        let event = StreamEvent {
            seq: self.next_seq,
            kind,
            payload,
        };
        self.next_seq += 1;

        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.trims += 1;
        }
        self.events.push_back(event.clone());
        event
    }

    pub fn trims(&self) -> u64 {
        self.trims
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.events.back().map(|e| e.seq)
    }

    pub fn oldest_seq(&self) -> Option<u64> {
        self.events.front().map(|e| e.seq)
    }

    /// All buffered events with `seq > since`. Because trimmed events are
    /// gone, the first returned event's seq may be greater than `since + 1`
    /// — callers must not fabricate the gap (spec §4.D).
    pub fn events_after(&self, since: u64) -> Vec<StreamEvent> {
        self.events.iter().filter(|e| e.seq > since).cloned().collect()
    }

    /// Like [`Self::events_after`] but `since = None` means "from the
    /// start" — used when a resume token was issued before any event had
    /// been produced yet.
    pub fn events_since(&self, since: Option<u64>) -> Vec<StreamEvent> {
        match since {
            Some(seq) => self.events_after(seq),
            None => self.events.iter().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut ring = Ring::new(4);
        let a = ring.push(EventKind::Stage, json!({}));
        let b = ring.push(EventKind::Stage, json!({}));
        assert!(b.seq > a.seq);
    }

    #[test]
    fn overflow_trims_oldest_and_increments_counter() {
        let mut ring = Ring::new(2);
        ring.push(EventKind::Stage, json!(1));
        ring.push(EventKind::Stage, json!(2));
        ring.push(EventKind::Stage, json!(3));
        assert_eq!(ring.trims(), 1);
        assert_eq!(ring.oldest_seq(), Some(1));
    }

    #[test]
    fn events_after_excludes_trimmed_entries() {
        let mut ring = Ring::new(2);
        ring.push(EventKind::Stage, json!(1)); // seq 0, trimmed
        ring.push(EventKind::Stage, json!(2)); // seq 1
        ring.push(EventKind::Stage, json!(3)); // seq 2
        let after = ring.events_after(0);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].seq, 1);
    }
}
