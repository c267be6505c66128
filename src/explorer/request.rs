//! Drives one request attempt from the wire into the session.
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::CONTENT_TYPE;

use super::status::StatusDraft;
use super::Explorer;
use crate::cancel::CancelHandle;
use crate::error::ExplorerError;
use crate::protocol::ApiFlavor;
use crate::stream::{
    is_streaming_content_type, ChunkDecoder, StreamConsumer, StreamEnd, StreamEvent,
};
use crate::transport::{format_headers, OutboundRequest};

/// Everything fixed at send time for one attempt.
#[derive(Debug)]
pub(super) struct Attempt {
    pub(super) request: OutboundRequest,
    pub(super) flavor: ApiFlavor,
    pub(super) stream_requested: bool,
    pub(super) cancel: CancelHandle,
    pub(super) started: Instant,
}

pub(super) async fn run(
    explorer: &Explorer,
    attempt: &Attempt,
    draft: &mut StatusDraft,
) -> Result<(), ExplorerError> {
    let cancel = &attempt.cancel;
    if cancel.is_cancelled() {
        return Err(ExplorerError::Cancelled);
    }

    let sent = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = explorer.transport().send(&attempt.request) => Some(result),
    };
    let response = sent.ok_or(ExplorerError::Cancelled)??;

    let status = response.status();
    draft.record_headers(status);
    let headers = format_headers(response.headers());
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    tracing::debug!(status = status.as_u16(), %content_type, "response headers received");
    explorer.mutate(|session| session.response_headers = headers);

    if !status.is_success() {
        let message = match read_to_end(Box::pin(response.bytes_stream()), cancel).await {
            Ok(text) if !text.trim().is_empty() => pretty_or_raw(&text),
            Ok(_) => format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            ),
            Err(stop) => return Err(keep_partial(explorer, stop)),
        };
        tracing::warn!(status = status.as_u16(), "upstream returned an error status");
        explorer.mutate(|session| session.response_body.clone_from(&message));
        return Err(ExplorerError::upstream(status, message));
    }

    let byte_stream = Box::pin(response.bytes_stream());
    if attempt.stream_requested || is_streaming_content_type(&content_type) {
        draft.mark_streaming();
        consume_stream(explorer, attempt, draft, byte_stream).await
    } else {
        match read_to_end(byte_stream, cancel).await {
            Ok(text) => {
                let (body, preview) = buffered_view(attempt.flavor, &text);
                explorer.mutate(|session| {
                    session.response_body = body;
                    session.response_preview = preview;
                });
                Ok(())
            }
            Err(stop) => Err(keep_partial(explorer, stop)),
        }
    }
}

/// Why a whole-body read ended early. Both carry the text read so far.
#[derive(Debug, PartialEq, Eq)]
enum ReadStop {
    Cancelled(String),
    Failed { partial: String, message: String },
}

/// Store the partial body and turn the stop into the attempt's error.
fn keep_partial(explorer: &Explorer, stop: ReadStop) -> ExplorerError {
    let (partial, err) = match stop {
        ReadStop::Cancelled(partial) => (partial, ExplorerError::Cancelled),
        ReadStop::Failed { partial, message } => (
            partial,
            ExplorerError::network(format!("body read failed: {message}")),
        ),
    };
    explorer.mutate(|session| session.response_body = partial);
    err
}

async fn consume_stream<S, E>(
    explorer: &Explorer,
    attempt: &Attempt,
    draft: &mut StatusDraft,
    byte_stream: S,
) -> Result<(), ExplorerError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let decoder = ChunkDecoder::new(attempt.flavor, draft.started());
    let mut consumer = StreamConsumer::new(byte_stream, decoder, attempt.cancel.clone());

    while let Some(event) = consumer.next().await {
        match event {
            StreamEvent::Chunk(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                explorer.mutate(|session| {
                    // Checked under the session lock, which `stop_request`
                    // also holds while cancelling: nothing lands after the
                    // cancel point.
                    if attempt.cancel.is_cancelled() {
                        return;
                    }
                    if let Some(at) = chunk.first_token {
                        draft.record_first_token(at);
                    }
                    session.response_body.push_str(&chunk.raw);
                    session.response_preview.push_str(&chunk.delta);
                });
            }
            StreamEvent::End(StreamEnd::Completed) => return Ok(()),
            StreamEvent::End(StreamEnd::Cancelled) => return Err(ExplorerError::Cancelled),
            StreamEvent::End(StreamEnd::Failed(message)) => {
                tracing::warn!(%message, "stream interrupted");
                return Err(ExplorerError::network(format!("stream interrupted: {message}")));
            }
        }
    }
    Ok(())
}

/// Read a whole body, racing cancellation. When the read ends early the
/// bytes read so far travel in the [`ReadStop`].
async fn read_to_end<S, E>(mut byte_stream: S, cancel: &CancelHandle) -> Result<String, ReadStop>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = byte_stream.next() => Some(item),
        };
        match next {
            None => return Err(ReadStop::Cancelled(lossy(&buffer))),
            Some(None) => return Ok(lossy(&buffer)),
            Some(Some(Ok(bytes))) => buffer.extend_from_slice(&bytes),
            Some(Some(Err(err))) => {
                tracing::warn!(error = %err, "body read failed, keeping partial body");
                return Err(ReadStop::Failed {
                    partial: lossy(&buffer),
                    message: err.to_string(),
                });
            }
        }
    }
}

fn lossy(buffer: &[u8]) -> String {
    String::from_utf8_lossy(buffer).into_owned()
}

fn pretty_or_raw(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| text.to_string())
}

/// Body and preview for a buffered response: JSON is pretty-printed and the
/// preview extracted per flavor; anything else passes through unchanged.
fn buffered_view(flavor: ApiFlavor, text: &str) -> (String, String) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => {
            let body = serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string());
            let preview = flavor.preview(&value).unwrap_or_else(|| body.clone());
            (body, preview)
        }
        Err(_) => (text.to_string(), text.to_string()),
    }
}
