//! Replace thinking blocks with a fixed placeholder.
//!
//! Both passes rewrite the payload in place. Message order, content order and
//! every non-thinking element are preserved; only the targeted blocks are
//! swapped for [`placeholder_block`].

use serde_json::{json, Value};

use super::blacklist::{short, SignatureBlacklist};
use super::classifier::Coordinate;
use super::context::SanitizeResult;

/// Text of the block that stands in for a removed thinking block.
pub const THINKING_PLACEHOLDER: &str = "[Previous thinking omitted due to invalid signature]";

/// `{"type": "text", "text": THINKING_PLACEHOLDER}`
pub fn placeholder_block() -> Value {
    json!({
        "type": "text",
        "text": THINKING_PLACEHOLDER,
    })
}

pub fn is_placeholder_block(block: &Value) -> bool {
    block_type(block) == Some("text")
        && block.get("text").and_then(|t| t.as_str()) == Some(THINKING_PLACEHOLDER)
}

/// Replace every `thinking` block whose signature is blacklisted for
/// `session_id`. A no-op when the session id is empty.
pub fn strip_blacklisted_thinking(
    body: &mut Value,
    session_id: &str,
    blacklist: &SignatureBlacklist,
) -> SanitizeResult {
    if session_id.is_empty() {
        return SanitizeResult::unchanged();
    }

    let result = replace_blocks(body, |block| {
        if block_type(block) != Some("thinking") {
            return false;
        }
        let Some(signature) = block_signature(block) else {
            return false;
        };
        let hit = blacklist.is_blacklisted(session_id, signature);
        if hit {
            tracing::debug!(
                signature = %short(signature),
                signature_len = signature.len(),
                "Replacing blacklisted thinking block"
            );
        }
        hit
    });

    if result.changed {
        tracing::debug!(replaced = result.replaced, "Selective thinking strip applied");
    }
    result
}

/// Replace every `thinking` and `redacted_thinking` block regardless of
/// signature. Idempotent.
pub fn strip_all_thinking(body: &mut Value) -> SanitizeResult {
    let result = replace_blocks(body, |block| {
        matches!(block_type(block), Some("thinking") | Some("redacted_thinking"))
    });

    if result.changed {
        tracing::debug!(replaced = result.replaced, "Full thinking strip applied");
    }
    result
}

/// Non-empty `signature` of the block at `coordinate`, if any.
pub fn signature_at(body: &Value, coordinate: Coordinate) -> Option<&str> {
    let block = body
        .get("messages")?
        .get(coordinate.message)?
        .get("content")?
        .get(coordinate.content)?;
    block_signature(block)
}

fn replace_blocks(body: &mut Value, mut should_replace: impl FnMut(&Value) -> bool) -> SanitizeResult {
    let Some(messages) = body.get_mut("messages").and_then(|v| v.as_array_mut()) else {
        return SanitizeResult::unchanged();
    };

    let mut replaced = 0u32;

    for message in messages.iter_mut() {
        // Flat string content carries no blocks.
        let Some(content) = message.get_mut("content").and_then(|v| v.as_array_mut()) else {
            continue;
        };

        for block in content.iter_mut() {
            if should_replace(block) {
                *block = placeholder_block();
                replaced += 1;
            }
        }
    }

    SanitizeResult::from_count(replaced)
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(|t| t.as_str())
}

fn block_signature(block: &Value) -> Option<&str> {
    block
        .get("signature")
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
}
