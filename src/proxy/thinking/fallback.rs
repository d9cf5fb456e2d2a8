//! Replay a non-streaming response as a provider-native stream.
//!
//! When a streaming request keeps failing on a thinking signature, the proxy
//! redoes it as one non-streaming call and answers the client with a
//! synthetic stream built from the result. The builders here are total: a
//! body that is not JSON is treated as an empty response.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::{json, Map, Value};

use super::classifier::{is_signature_error, is_signature_error_text};
use crate::config::Provider;
use crate::sse::{write_data, write_event, DONE_FRAME};

/// Framing of a reconstructed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Anthropic Messages: labelled events, one delta per content block.
    Claude,
    /// OpenAI chat completions: one `chat.completion.chunk` then `[DONE]`.
    OpenAi,
    /// Gemini with SSE framing: the whole response in one `data:` frame.
    GeminiSse,
    /// Gemini with JSON framing: the response as-is.
    GeminiJson,
}

impl StreamFormat {
    /// Framing for `provider`. `alt` is the Gemini `alt` query parameter:
    /// absent, empty or `sse` selects SSE framing.
    pub fn for_provider(provider: Provider, alt: Option<&str>) -> Self {
        match provider {
            Provider::Claude => StreamFormat::Claude,
            Provider::OpenAi => StreamFormat::OpenAi,
            Provider::Gemini => match alt.map(str::trim) {
                None | Some("") => StreamFormat::GeminiSse,
                Some(alt) if alt.eq_ignore_ascii_case("sse") => StreamFormat::GeminiSse,
                Some(_) => StreamFormat::GeminiJson,
            },
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            StreamFormat::GeminiJson => "application/json",
            _ => "text/event-stream",
        }
    }
}

/// Whether a streaming request's final error warrants a non-streaming redo.
///
/// Looser than [`is_signature_error`]: the keywords may also appear anywhere
/// in the raw body, outside the extracted message.
pub fn should_fallback_to_non_stream(status: StatusCode, body: &[u8]) -> bool {
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    is_signature_error(status, body) || is_signature_error_text(&String::from_utf8_lossy(body))
}

/// Copy of `payload` with `"stream": false`.
pub fn clone_request_without_stream(payload: &Value) -> Value {
    let mut cloned = payload.clone();
    if let Some(obj) = cloned.as_object_mut() {
        obj.insert("stream".to_string(), Value::Bool(false));
    }
    cloned
}

/// Whether the request body asks for a streamed response.
pub fn is_stream_request(payload: &Value) -> bool {
    payload
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false)
}

/// Build the synthetic stream for `format` from a non-streaming body.
pub fn build_final_only_stream(format: StreamFormat, response: &[u8]) -> Bytes {
    let root: Value = serde_json::from_slice(response).unwrap_or(Value::Null);

    match format {
        StreamFormat::Claude => Bytes::from(build_claude_stream(&root)),
        StreamFormat::OpenAi => Bytes::from(build_openai_stream(&root)),
        StreamFormat::GeminiSse => {
            let mut buf = String::new();
            write_data(&mut buf, String::from_utf8_lossy(response).trim());
            Bytes::from(buf)
        }
        StreamFormat::GeminiJson => Bytes::copy_from_slice(response),
    }
}

fn build_claude_stream(root: &Value) -> String {
    let mut buf = String::new();

    let mut message = root.as_object().cloned().unwrap_or_default();
    message.insert("content".to_string(), json!([]));
    message.insert("stop_reason".to_string(), Value::Null);
    message.insert("stop_sequence".to_string(), Value::Null);
    if let Some(usage) = root.get("usage") {
        message.insert("usage".to_string(), start_usage(usage));
    }
    write_event(
        &mut buf,
        "message_start",
        &json!({"type": "message_start", "message": Value::Object(message)}),
    );

    let blocks = root
        .get("content")
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for (index, block) in blocks.iter().enumerate() {
        let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let text_field = |name: &str| block.get(name).and_then(|t| t.as_str()).unwrap_or("");

        let opening = match block_type {
            "text" => json!({"type": "text", "text": ""}),
            "thinking" => json!({"type": "thinking", "thinking": "", "signature": ""}),
            _ => block.clone(),
        };
        write_event(
            &mut buf,
            "content_block_start",
            &json!({"type": "content_block_start", "index": index, "content_block": opening}),
        );

        match block_type {
            "text" => write_event(
                &mut buf,
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": {"type": "text_delta", "text": text_field("text")},
                }),
            ),
            "thinking" => {
                write_event(
                    &mut buf,
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "thinking_delta", "thinking": text_field("thinking")},
                    }),
                );
                let signature = text_field("signature");
                if !signature.is_empty() {
                    write_event(
                        &mut buf,
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": index,
                            "delta": {"type": "signature_delta", "signature": signature},
                        }),
                    );
                }
            }
            _ => {}
        }

        write_event(
            &mut buf,
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": index}),
        );
    }

    let mut message_delta = json!({
        "type": "message_delta",
        "delta": {
            "stop_reason": root.get("stop_reason").cloned().unwrap_or(Value::Null),
            "stop_sequence": root.get("stop_sequence").cloned().unwrap_or(Value::Null),
        },
    });
    if let Some(usage) = root.get("usage") {
        message_delta["usage"] = usage.clone();
    }
    write_event(&mut buf, "message_delta", &message_delta);
    write_event(&mut buf, "message_stop", &json!({"type": "message_stop"}));

    buf
}

/// Usage as reported at stream start: input side only, no output yet.
fn start_usage(usage: &Value) -> Value {
    let mut start = usage.as_object().cloned().unwrap_or_default();
    start.insert("output_tokens".to_string(), json!(0));
    Value::Object(start)
}

fn build_openai_stream(root: &Value) -> String {
    let id = root
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()));
    let created = root
        .get("created")
        .and_then(|v| v.as_i64())
        .filter(|c| *c != 0)
        .unwrap_or_else(unix_now);
    let model = root.get("model").and_then(|v| v.as_str()).unwrap_or("");

    let choices: Vec<Value> = root
        .get("choices")
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(position, choice)| openai_chunk_choice(position, choice))
        .collect();

    let mut chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": choices,
    });
    if let Some(usage) = root.get("usage").filter(|u| !u.is_null()) {
        chunk["usage"] = usage.clone();
    }

    let mut buf = String::new();
    write_data(&mut buf, &chunk.to_string());
    buf.push_str(DONE_FRAME);
    buf
}

fn openai_chunk_choice(position: usize, choice: &Value) -> Value {
    let index = choice
        .get("index")
        .cloned()
        .unwrap_or_else(|| json!(position));
    let message = choice.get("message");
    let field = |name: &str| message.and_then(|m| m.get(name));

    let mut delta = Map::new();
    for name in ["role", "content", "reasoning_content"] {
        if let Some(text) = field(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            delta.insert(name.to_string(), json!(text));
        }
    }
    if let Some(tool_calls) = field("tool_calls").filter(|t| !t.is_null()) {
        delta.insert("tool_calls".to_string(), tool_calls.clone());
    }

    let mut out = json!({"index": index, "delta": Value::Object(delta)});
    if let Some(reason) = choice
        .get("finish_reason")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
    {
        out["finish_reason"] = json!(reason);
    }
    out
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
