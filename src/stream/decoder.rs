use std::time::{Duration, Instant};

use serde_json::Value;

use super::lines::LineFramer;
use crate::error::ExplorerError;
use crate::protocol::ApiFlavor;

const DONE_SENTINEL: &str = "[DONE]";

/// Result of decoding one transport chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    /// Chunk text exactly as received (lossy UTF-8).
    pub raw: String,
    /// Preview text extracted from the chunk's complete events.
    pub delta: String,
    /// Set on the chunk that carried the first non-empty fragment, and only there.
    pub first_token: Option<Duration>,
    /// Lines that could not be parsed and were left out of the preview.
    pub warnings: usize,
    /// The stream signalled its own end inside this chunk.
    pub done: bool,
}

impl DecodedChunk {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.delta.is_empty()
    }
}

/// Synchronous per-chunk decoder: UTF-8, framing, and preview extraction.
#[derive(Debug)]
pub struct ChunkDecoder {
    flavor: ApiFlavor,
    started: Instant,
    utf8_carry: Vec<u8>,
    framer: LineFramer,
    payloads: Vec<String>,
    first_token: Option<Duration>,
    done: bool,
    warnings: usize,
}

impl ChunkDecoder {
    /// `started` is the request start; first-token time is measured from it.
    #[must_use]
    pub fn new(flavor: ApiFlavor, started: Instant) -> Self {
        Self {
            flavor,
            started,
            utf8_carry: Vec::new(),
            framer: LineFramer::new(),
            payloads: Vec::new(),
            first_token: None,
            done: false,
            warnings: 0,
        }
    }

    pub fn decode(&mut self, bytes: &[u8]) -> DecodedChunk {
        let raw = decode_utf8_with_carry(&mut self.utf8_carry, bytes);
        let mut payloads = std::mem::take(&mut self.payloads);
        self.framer.feed_into(&raw, &mut payloads);
        let chunk = self.process(raw, &mut payloads);
        self.payloads = payloads;
        chunk
    }

    /// Flush bytes and a partial line left over when the transport closed.
    pub fn finish(&mut self) -> DecodedChunk {
        let raw = if self.utf8_carry.is_empty() {
            String::new()
        } else {
            let tail = String::from_utf8_lossy(&self.utf8_carry).into_owned();
            self.utf8_carry.clear();
            tail
        };
        let mut payloads = std::mem::take(&mut self.payloads);
        if !raw.is_empty() {
            self.framer.feed_into(&raw, &mut payloads);
        }
        payloads.extend(self.framer.finish());
        let chunk = self.process(raw, &mut payloads);
        self.payloads = payloads;
        chunk
    }

    #[must_use]
    pub fn first_token(&self) -> Option<Duration> {
        self.first_token
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[must_use]
    pub fn warnings(&self) -> usize {
        self.warnings
    }

    fn process(&mut self, raw: String, payloads: &mut Vec<String>) -> DecodedChunk {
        let mut delta = String::new();
        let mut warnings = 0usize;
        for payload in payloads.drain(..) {
            if self.done {
                continue;
            }
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                self.done = true;
                continue;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(event) => {
                    if let Some(text) = self.flavor.stream_delta(&event) {
                        delta.push_str(text);
                    }
                    if self.flavor.is_final_event(&event) {
                        self.done = true;
                    }
                }
                Err(err) => {
                    warnings += 1;
                    let warning = ExplorerError::StreamDecode(err.to_string());
                    tracing::warn!(
                        %warning,
                        line_len = payload.len(),
                        "skipping malformed stream line"
                    );
                }
            }
        }
        self.warnings += warnings;

        let mut first_token = None;
        if self.first_token.is_none() && !delta.is_empty() {
            let elapsed = self.started.elapsed();
            self.first_token = Some(elapsed);
            first_token = Some(elapsed);
        }

        DecodedChunk {
            raw,
            delta,
            first_token,
            warnings,
            done: self.done,
        }
    }
}

/// Decode `bytes` after any carried-over prefix, keeping an incomplete
/// trailing sequence in `carry`. Invalid sequences become U+FFFD.
fn decode_utf8_with_carry(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    let mut pending = std::mem::take(carry);
    pending.extend_from_slice(bytes);
    let mut out = String::with_capacity(pending.len());
    let mut start = 0usize;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(valid) => {
                out.push_str(valid);
                break;
            }
            Err(err) => {
                let valid_end = start + err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[start..valid_end]));
                if let Some(invalid_len) = err.error_len() {
                    out.push(char::REPLACEMENT_CHARACTER);
                    start = valid_end + invalid_len;
                } else {
                    carry.extend_from_slice(&pending[valid_end..]);
                    break;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(flavor: ApiFlavor) -> ChunkDecoder {
        ChunkDecoder::new(flavor, Instant::now())
    }

    #[test]
    fn test_sse_delta_sequence_builds_preview() {
        let mut decoder = decoder(ApiFlavor::OpenAi);
        let chunks = [
            "data: {\"delta\":\"Hel\"}\n",
            "data: {\"delta\":\"lo\"}\n",
            "data: [DONE]\n",
        ];
        let decoded: Vec<DecodedChunk> = chunks
            .iter()
            .map(|c| decoder.decode(c.as_bytes()))
            .collect();

        let preview: String = decoded.iter().map(|c| c.delta.as_str()).collect();
        assert_eq!(preview, "Hello");
        assert!(decoded[0].first_token.is_some());
        assert!(decoded[1].first_token.is_none());
        assert!(decoded[2].first_token.is_none());
        assert!(decoded[2].done);
        assert_eq!(decoder.first_token(), decoded[0].first_token);
    }

    #[test]
    fn test_malformed_line_is_skipped_not_fatal() {
        let mut decoder = decoder(ApiFlavor::Ollama);
        let chunks = [
            "{not json\n",
            "{\"message\":{\"content\":\"A\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"B\"},\"done\":false}\n",
        ];
        let mut body = String::new();
        let mut preview = String::new();
        for chunk in chunks {
            let decoded = decoder.decode(chunk.as_bytes());
            body.push_str(&decoded.raw);
            preview.push_str(&decoded.delta);
        }
        assert_eq!(preview, "AB");
        assert_eq!(body, chunks.concat());
        assert_eq!(decoder.warnings(), 1);
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut decoder = decoder(ApiFlavor::Ollama);
        let line = "{\"response\":\"caf\u{e9}\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).expect("multibyte start") + 1;
        let first = decoder.decode(&line[..split]);
        let second = decoder.decode(&line[split..]);
        assert_eq!(format!("{}{}", first.raw, second.raw), "{\"response\":\"caf\u{e9}\"}\n");
        assert_eq!(second.delta, "caf\u{e9}");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = decoder(ApiFlavor::Ollama);
        let decoded = decoder.decode(b"ab\xFFcd\n");
        assert_eq!(decoded.raw, "ab\u{fffd}cd\n");
        assert_eq!(decoded.warnings, 1);
    }

    #[test]
    fn test_ollama_done_flag_ends_stream() {
        let mut decoder = decoder(ApiFlavor::Ollama);
        let decoded = decoder.decode(b"{\"response\":\"x\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n");
        assert_eq!(decoded.delta, "x");
        assert!(decoded.done);
    }

    #[test]
    fn test_finish_flushes_partial_line() {
        let mut decoder = decoder(ApiFlavor::OpenAi);
        let first = decoder.decode(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert!(first.delta.is_empty());
        let tail = decoder.finish();
        assert!(tail.raw.is_empty());
        assert_eq!(tail.delta, "tail");
        assert!(tail.first_token.is_some());
    }

    #[test]
    fn test_empty_fragments_do_not_set_first_token() {
        let mut decoder = decoder(ApiFlavor::OpenAi);
        let role = decoder.decode(b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n");
        assert!(role.first_token.is_none());
        let text = decoder.decode(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n");
        assert!(text.first_token.is_some());
    }
}
