//! OpenAI-compatible API (`/v1/*`).
//!
//! Streams are server-sent events whose `data:` payloads are JSON chunks,
//! terminated by `data: [DONE]`.

use serde_json::{json, Value};

use super::{minimal_body, summarize_embeddings, user_message, Endpoint, Operation, DEFAULT_PROMPT};

pub const API_PREFIX: &str = "/v1";
const DEFAULT_MAX_TOKENS: u32 = 256;

pub(crate) fn endpoint(operation: &Operation) -> Endpoint {
    match operation {
        Operation::Chat => Endpoint::post("/v1/chat/completions"),
        Operation::Completion => Endpoint::post("/v1/completions"),
        Operation::Embeddings => Endpoint::post("/v1/embeddings"),
        Operation::ListModels => Endpoint::get("/v1/models"),
        Operation::Other(name) => Endpoint::post(format!("{API_PREFIX}/{name}")),
    }
}

pub(crate) fn build_body(operation: &Operation, model: &str, stream: bool) -> Value {
    match operation {
        Operation::Chat => json!({
            "model": model,
            "messages": user_message(DEFAULT_PROMPT),
            "stream": stream,
        }),
        Operation::Completion => json!({
            "model": model,
            "prompt": DEFAULT_PROMPT,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "stream": stream,
        }),
        Operation::Embeddings => json!({
            "model": model,
            "input": DEFAULT_PROMPT,
        }),
        Operation::ListModels => json!({}),
        Operation::Other(_) => minimal_body(model, stream),
    }
}

fn first_choice(value: &Value) -> Option<&Value> {
    value.get("choices")?.as_array()?.first()
}

pub(crate) fn stream_delta(event: &Value) -> Option<&str> {
    let choice = first_choice(event)?;
    choice
        .pointer("/delta/content")
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))
}

// `[DONE]` is handled by the line framer; no JSON event ends the stream.
pub(crate) fn is_done(_event: &Value) -> bool {
    false
}

pub(crate) fn preview(body: &Value) -> Option<String> {
    if let Some(choice) = first_choice(body) {
        let text = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .or_else(|| choice.get("text").and_then(Value::as_str))?;
        return Some(text.to_string());
    }
    let data = body.get("data").and_then(Value::as_array)?;
    if data.iter().any(|item| item.get("embedding").is_some()) {
        return Some(summarize_embeddings(
            data.iter().filter_map(|item| item.get("embedding")),
        ));
    }
    let ids: Vec<&str> = data
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_str))
        .collect();
    Some(ids.join("\n"))
}
