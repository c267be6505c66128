//! Incremental line framer for streamed response bodies.
//!
//! Handles both newline-delimited JSON (Ollama) and server-sent events
//! (OpenAI-compatible). Text may arrive split at arbitrary boundaries; only
//! complete lines are emitted until [`LineFramer::finish`] flushes the tail.
use memchr::memchr_iter;

/// Incremental line splitter that yields event payloads.
///
/// Rules applied to each complete line:
/// - blank lines are frame separators and are skipped
/// - lines starting with `:` are SSE comments and are skipped
/// - `data:` lines yield their value (one leading space stripped)
/// - `event:`, `id:` and `retry:` lines are ignored
/// - anything else is yielded as-is (NDJSON)
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: String,
    read_offset: usize,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and return the payloads of every completed line.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed decoded text and append completed payloads into `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            if let Some(payload) = payload_of(&self.buffer[processed_up_to..line_end]) {
                out.push(payload.to_string());
            }
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing line that never received its newline.
    pub fn finish(&mut self) -> Option<String> {
        let tail = payload_of(&self.buffer[self.read_offset..]).map(str::to_string);
        self.buffer.clear();
        self.read_offset = 0;
        tail
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }
}

fn payload_of(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(value) = line.strip_prefix("data:") {
        return Some(value.strip_prefix(' ').unwrap_or(value));
    }
    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return None;
    }
    Some(line)
}
