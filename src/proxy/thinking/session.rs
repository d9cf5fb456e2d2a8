//! Approximate conversation identity for blacklist scoping.
//!
//! Callers never send an explicit session id, so the first user turn stands
//! in for one: the same opening message always maps to the same key. Editing
//! that message starts a new key.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length in bytes of the digest prefix kept for the key (32 hex chars).
const SESSION_DIGEST_BYTES: usize = 16;

/// Derive the session key from a request body's `messages`.
///
/// Returns an empty string when no user message carries extractable text;
/// blacklist operations treat that as "tracking disabled".
pub fn derive_session_id(body: &Value) -> String {
    let Some(messages) = body.get("messages").and_then(|m| m.as_array()) else {
        return String::new();
    };

    messages
        .iter()
        .filter(|msg| msg.get("role").and_then(|r| r.as_str()) == Some("user"))
        .find_map(|msg| first_text(msg.get("content")?))
        .map(|text| {
            let digest = Sha256::digest(text.as_bytes());
            hex::encode(&digest[..SESSION_DIGEST_BYTES])
        })
        .unwrap_or_default()
}

/// Flat string content, or the text of the first structured element.
fn first_text(content: &Value) -> Option<&str> {
    let text = match content {
        Value::String(text) => text.as_str(),
        Value::Array(items) => items.first()?.get("text")?.as_str()?,
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
