pub mod consumer;
pub mod decoder;
pub mod lines;

pub use consumer::{StreamConsumer, StreamEnd, StreamEvent};
pub use decoder::{ChunkDecoder, DecodedChunk};
pub use lines::LineFramer;

/// Content types that mark a response as incrementally streamed.
const STREAMING_CONTENT_TYPES: &[&str] = &[
    "text/event-stream",
    "application/x-ndjson",
    "application/ndjson",
    "application/jsonl",
];

/// Whether a `Content-Type` header value denotes a streamed body.
#[must_use]
pub fn is_streaming_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    STREAMING_CONTENT_TYPES.contains(&essence.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_content_types() {
        assert!(is_streaming_content_type("text/event-stream; charset=utf-8"));
        assert!(is_streaming_content_type("application/x-ndjson"));
        assert!(!is_streaming_content_type("application/json"));
        assert!(!is_streaming_content_type(""));
    }
}
