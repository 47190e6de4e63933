//! SSE wire encoding (spec §6 "SSE wire format").
//!
//! `event: <type>\ndata: <json>\n\n`. Heartbeat lines begin `: ` (an SSE
//! comment, ignored by clients, used purely to keep the connection alive).

use super::ring::{EventKind, StreamEvent};

pub fn encode(event: &StreamEvent) -> String {
    match event.kind {
        EventKind::Heartbeat => ": heartbeat\n\n".to_string(),
        EventKind::Stage | EventKind::Resume => {
            let type_name = match event.kind {
                EventKind::Stage => "stage",
                EventKind::Resume => "resume",
                EventKind::Heartbeat => unreachable!(),
            };
            let data = serde_json::json!({ "seq": event.seq, "payload": event.payload });
            format!("event: {type_name}\ndata: {data}\n\n")
        }
    }
}

pub fn encode_heartbeat() -> String {
    ": heartbeat\n\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_event_has_event_and_data_lines() {
        let event = StreamEvent {
            seq: 3,
            kind: EventKind::Stage,
            payload: json!({ "stage": "DRAFT" }),
        };
        let wire = encode(&event);
        assert!(wire.starts_with("event: stage\n"));
        assert!(wire.contains("\"seq\":3"));
        assert!(wire.ends_with("\n\n"));
    }

    #[test]
    fn heartbeat_is_a_comment_line() {
        let wire = encode_heartbeat();
        assert!(wire.starts_with(": "));
    }
}
