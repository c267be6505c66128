//! Ollama native API (`/api/*`).
//!
//! Streams are newline-delimited JSON objects; the last one carries
//! `"done": true`.

use serde_json::{json, Value};

use super::{minimal_body, summarize_embeddings, user_message, Endpoint, Operation, DEFAULT_PROMPT};

pub const API_PREFIX: &str = "/api";

pub(crate) fn endpoint(operation: &Operation) -> Endpoint {
    match operation {
        Operation::Chat => Endpoint::post("/api/chat"),
        Operation::Completion => Endpoint::post("/api/generate"),
        Operation::Embeddings => Endpoint::post("/api/embed"),
        Operation::ListModels => Endpoint::get("/api/tags"),
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

pub(crate) fn stream_delta(event: &Value) -> Option<&str> {
    event
        .pointer("/message/content")
        .and_then(Value::as_str)
        .or_else(|| event.get("response").and_then(Value::as_str))
}

pub(crate) fn is_done(event: &Value) -> bool {
    event.get("done").and_then(Value::as_bool) == Some(true)
}

pub(crate) fn preview(body: &Value) -> Option<String> {
    if let Some(text) = stream_delta(body) {
        return Some(text.to_string());
    }
    if let Some(vectors) = body.get("embeddings").and_then(Value::as_array) {
        return Some(summarize_embeddings(vectors.iter()));
    }
    if let Some(vector) = body.get("embedding").and_then(Value::as_array) {
        return Some(format!("1 embedding(s), {} dimensions", vector.len()));
    }
    let models = body.get("models").and_then(Value::as_array)?;
    let names: Vec<&str> = models
        .iter()
        .filter_map(|model| model.get("name").and_then(Value::as_str))
        .collect();
    Some(names.join("\n"))
}
