//! Recognise "invalid thinking signature" rejections across provider error
//! envelopes.
//!
//! Supported shapes:
//! - `{"error": {"message": "..."}}`
//! - `{"message": "..."}`
//! - raw text
//! - a Google RPC envelope whose `error.message` is itself one of the JSON
//!   shapes above, serialized to a string

use std::sync::LazyLock;

use axum::http::StatusCode;
use regex::Regex;
use serde_json::Value;

/// Maximum number of envelopes unwrapped while looking for a message.
const MAX_ENVELOPE_DEPTH: usize = 2;

static COORDINATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"messages\.(\d+)\.content\.(\d+)").expect("coordinate pattern is valid")
});

/// Zero-based location of the content block a provider rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub message: usize,
    pub content: usize,
}

/// True iff `status` is 400 and the error message mentions an invalid
/// thinking signature.
pub fn is_signature_error(status: StatusCode, body: &[u8]) -> bool {
    status == StatusCode::BAD_REQUEST && is_signature_error_text(&extract_error_message(body))
}

/// Keyword test on already-extracted text. All three words must appear;
/// their order and surrounding punctuation vary between providers.
pub fn is_signature_error_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["invalid", "signature", "thinking"]
        .iter()
        .all(|keyword| lower.contains(keyword))
}

/// Locate the rejected block from a `messages.<i>.content.<j>` hint.
///
/// `None` is the common case: many providers omit positional detail.
pub fn extract_coordinate(body: &[u8]) -> Option<Coordinate> {
    let message = extract_error_message(body);
    let captures = COORDINATE_PATTERN.captures(&message)?;
    Some(Coordinate {
        message: captures[1].parse().ok()?,
        content: captures[2].parse().ok()?,
    })
}

/// Best human-readable message in an error body.
///
/// Tries `error.message`, then `message`, then the raw text. If the result
/// is itself a JSON envelope, one more level is unwrapped.
pub fn extract_error_message(body: &[u8]) -> String {
    let raw = String::from_utf8_lossy(body);
    let mut message = envelope_message(&raw).unwrap_or_else(|| raw.into_owned());

    for _ in 1..MAX_ENVELOPE_DEPTH {
        match envelope_message(&message) {
            Some(inner) => message = inner,
            None => break,
        }
    }

    message
}

fn envelope_message(text: &str) -> Option<String> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_owned);

    value
        .pointer("/error/message")
        .and_then(non_empty)
        .or_else(|| value.get("message").and_then(non_empty))
}
