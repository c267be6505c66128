use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{ExplorerError, Outcome};

/// Final status of one request attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseStatusInfo {
    pub http_status: u16,
    pub status_text: String,
    /// Start of the attempt to its end.
    pub request_time_ms: u64,
    pub outcome: Outcome,
    pub time_to_first_byte_ms: Option<u64>,
    pub time_to_first_token_ms: Option<u64>,
    /// First byte to end of stream; streamed responses only.
    pub total_streaming_time_ms: Option<u64>,
    pub message: Option<String>,
}

/// Milestones collected while an attempt is in flight.
///
/// All milestones are measured from the same start instant, so
/// `first_byte <= first_token <= end` holds by construction.
#[derive(Debug)]
pub(crate) struct StatusDraft {
    started: Instant,
    http_status: Option<(u16, String)>,
    first_byte: Option<Duration>,
    first_token: Option<Duration>,
    streamed: bool,
}

impl StatusDraft {
    pub(crate) fn new(started: Instant) -> Self {
        Self {
            started,
            http_status: None,
            first_byte: None,
            first_token: None,
            streamed: false,
        }
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    pub(crate) fn record_headers(&mut self, status: http::StatusCode) {
        self.first_byte = Some(self.started.elapsed());
        self.http_status = Some((
            status.as_u16(),
            status.canonical_reason().unwrap_or_default().to_string(),
        ));
    }

    pub(crate) fn record_first_token(&mut self, at: Duration) {
        if self.first_token.is_none() {
            self.first_token = Some(at);
        }
    }

    pub(crate) fn mark_streaming(&mut self) {
        self.streamed = true;
    }

    pub(crate) fn finalize(self, outcome: Outcome, message: Option<String>) -> ResponseStatusInfo {
        let total = self.started.elapsed();
        let (http_status, status_text) = self
            .http_status
            .unwrap_or_else(|| (crate::error::SYNTHETIC_STATUS, String::new()));
        let total_streaming = if self.streamed {
            self.first_byte.map(|first_byte| total.saturating_sub(first_byte))
        } else {
            None
        };
        ResponseStatusInfo {
            http_status,
            status_text,
            request_time_ms: millis(total),
            outcome,
            time_to_first_byte_ms: self.first_byte.map(millis),
            time_to_first_token_ms: self.first_token.map(millis),
            total_streaming_time_ms: total_streaming.map(millis),
            message,
        }
    }

    /// Errors before the status line use the error's synthetic status;
    /// after it, the received status line is kept.
    pub(crate) fn finalize_error(mut self, err: &ExplorerError) -> ResponseStatusInfo {
        if self.http_status.is_none() {
            self.http_status = Some(err.status_line());
        }
        self.finalize(err.outcome(), Some(err.to_string()))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
