//! SSE (Server-Sent Events) framing.
//!
//! Writes the two frame shapes upstream providers use (labelled
//! `event:`/`data:` pairs and bare `data:` frames) and parses them back.
//! The parser handles format variations (e.g. `data:{...}` vs `data: {...}`).

use serde_json::Value;

/// Terminator used by OpenAI-compatible streams.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Append a labelled frame: `event: <name>\ndata: <json>\n\n`.
pub fn write_event(buf: &mut String, event: &str, data: &Value) {
    buf.push_str("event: ");
    buf.push_str(event);
    buf.push('\n');
    write_data(buf, &data.to_string());
}

/// Append an unlabelled frame: `data: <payload>\n\n`.
pub fn write_data(buf: &mut String, payload: &str) {
    buf.push_str("data: ");
    buf.push_str(payload);
    buf.push_str("\n\n");
}

/// A parsed SSE frame.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// Value of the `event:` line, if the frame had one.
    pub event: Option<String>,
    /// Event type: the `event:` label, else the `type` field of the payload.
    pub event_type: String,
    /// Full parsed JSON payload.
    pub data: Value,
}

/// Parse SSE stream bytes into structured events.
///
/// Handles:
/// - `data: {...}` (standard, with space)
/// - `data:{...}` (compact, no space; used by some providers)
/// - `event:` lines, attached to the data line that follows them
/// - `[DONE]` markers and non-JSON lines are skipped
/// - comments and empty lines are skipped
pub fn parse_sse_events(bytes: &[u8]) -> Vec<SseEvent> {
    let text = String::from_utf8_lossy(bytes);
    let mut events = Vec::new();
    let mut pending_event: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            pending_event = None;
            continue;
        }
        if let Some(name) = line.strip_prefix("event:") {
            pending_event = Some(name.trim().to_string());
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let Ok(json) = serde_json::from_str::<Value>(data.trim_start()) else {
            continue;
        };

        let event = pending_event.take();
        let event_type = event
            .clone()
            .or_else(|| json.get("type").and_then(|t| t.as_str()).map(String::from))
            .unwrap_or_default();
        events.push(SseEvent {
            event,
            event_type,
            data: json,
        });
    }

    events
}

/// Whether the stream carries an OpenAI-style `[DONE]` terminator.
pub fn has_done_marker(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .any(|data| data.trim() == "[DONE]")
}
