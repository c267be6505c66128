pub mod ollama;
pub mod openai;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Prompt used by every generated preset body.
pub const DEFAULT_PROMPT: &str = "Why is the sky blue?";

/// Which vendor schema a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ApiFlavor {
    #[default]
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

impl fmt::Display for ApiFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFlavor::Ollama => write!(f, "ollama"),
            ApiFlavor::OpenAi => write!(f, "openai"),
        }
    }
}

impl FromStr for ApiFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ApiFlavor::Ollama),
            "openai" | "openai-compatible" => Ok(ApiFlavor::OpenAi),
            other => Err(format!("unknown api flavor '{other}'")),
        }
    }
}

/// Logical operation of a preset.
///
/// Names that match no known operation are kept as [`Operation::Other`] so a
/// malformed preset still yields a usable body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    Chat,
    Completion,
    Embeddings,
    ListModels,
    Other(String),
}

impl Operation {
    #[must_use]
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "chat" => Operation::Chat,
            "completion" | "completions" | "generate" => Operation::Completion,
            "embeddings" | "embedding" | "embed" => Operation::Embeddings,
            "models" | "list_models" | "list-models" | "tags" => Operation::ListModels,
            _ => Operation::Other(name.trim().to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Chat => "chat",
            Operation::Completion => "completion",
            Operation::Embeddings => "embeddings",
            Operation::ListModels => "models",
            Operation::Other(name) => name,
        }
    }

    /// Whether the request carries a JSON body at all.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !matches!(self, Operation::ListModels)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Operation::parse_lenient(s))
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Operation::parse_lenient(&name))
    }
}

/// HTTP method and path for one flavor/operation pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: http::Method,
    pub path: String,
}

impl Endpoint {
    fn post(path: impl Into<String>) -> Self {
        Self {
            method: http::Method::POST,
            path: path.into(),
        }
    }

    fn get(path: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            path: path.into(),
        }
    }
}

impl ApiFlavor {
    #[must_use]
    pub fn endpoint(self, operation: &Operation) -> Endpoint {
        match self {
            ApiFlavor::Ollama => ollama::endpoint(operation),
            ApiFlavor::OpenAi => openai::endpoint(operation),
        }
    }

    /// Request body for a preset. Never fails: unknown operations get a
    /// minimal `{model, stream}` body.
    #[must_use]
    pub fn build_body(self, operation: &Operation, model: &str, stream: bool) -> Value {
        match self {
            ApiFlavor::Ollama => ollama::build_body(operation, model, stream),
            ApiFlavor::OpenAi => openai::build_body(operation, model, stream),
        }
    }

    /// Incremental text carried by one streamed event.
    #[must_use]
    pub fn stream_delta(self, event: &Value) -> Option<&str> {
        let specific = match self {
            ApiFlavor::Ollama => ollama::stream_delta(event),
            ApiFlavor::OpenAi => openai::stream_delta(event),
        };
        specific.or_else(|| generic_delta(event))
    }

    /// Whether a streamed event marks the end of the stream by itself.
    #[must_use]
    pub fn is_final_event(self, event: &Value) -> bool {
        match self {
            ApiFlavor::Ollama => ollama::is_done(event),
            ApiFlavor::OpenAi => openai::is_done(event),
        }
    }

    /// Best-effort readable text for a buffered (non-stream) response.
    #[must_use]
    pub fn preview(self, body: &Value) -> Option<String> {
        match self {
            ApiFlavor::Ollama => ollama::preview(body),
            ApiFlavor::OpenAi => openai::preview(body),
        }
    }
}

fn generic_delta(event: &Value) -> Option<&str> {
    event.get("delta").and_then(Value::as_str)
}

pub(crate) fn user_message(prompt: &str) -> Value {
    serde_json::json!([{ "role": "user", "content": prompt }])
}

pub(crate) fn minimal_body(model: &str, stream: bool) -> Value {
    serde_json::json!({ "model": model, "stream": stream })
}

pub(crate) fn summarize_embeddings<'a>(vectors: impl Iterator<Item = &'a Value>) -> String {
    let mut count = 0usize;
    let mut dimensions = 0usize;
    for vector in vectors {
        if count == 0 {
            dimensions = vector.as_array().map_or(0, Vec::len);
        }
        count += 1;
    }
    format!("{count} embedding(s), {dimensions} dimensions")
}
