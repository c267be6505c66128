use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::decoder::{ChunkDecoder, DecodedChunk};
use crate::cancel::CancelHandle;

/// Why a stream stopped producing chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Sentinel received or the transport closed.
    Completed,
    Cancelled,
    /// Read error mid-stream; chunks already yielded stay valid.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(DecodedChunk),
    End(StreamEnd),
}

/// Lazy, single-use reader over a response byte stream.
///
/// Yields one [`StreamEvent::Chunk`] per transport chunk, then exactly one
/// [`StreamEvent::End`], then `None` forever. Cancellation is checked before
/// every read and raced against it.
pub struct StreamConsumer<S> {
    stream: S,
    decoder: ChunkDecoder,
    cancel: CancelHandle,
    closed: bool,
    finished: bool,
}

impl<S, E> StreamConsumer<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    #[must_use]
    pub fn new(stream: S, decoder: ChunkDecoder, cancel: CancelHandle) -> Self {
        Self {
            stream,
            decoder,
            cancel,
            closed: false,
            finished: false,
        }
    }

    #[must_use]
    pub fn decoder(&self) -> &ChunkDecoder {
        &self.decoder
    }

    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            return Some(self.end(StreamEnd::Cancelled));
        }
        if self.closed || self.decoder.is_done() {
            return Some(self.end(StreamEnd::Completed));
        }

        let cancel = self.cancel.clone();
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = self.stream.next() => Some(item),
        };
        let Some(item) = read else {
            return Some(self.end(StreamEnd::Cancelled));
        };

        match item {
            Some(Ok(bytes)) => Some(StreamEvent::Chunk(self.decoder.decode(&bytes))),
            Some(Err(err)) => Some(self.end(StreamEnd::Failed(err.to_string()))),
            None => {
                self.closed = true;
                let tail = self.decoder.finish();
                if tail.is_empty() {
                    Some(self.end(StreamEnd::Completed))
                } else {
                    Some(StreamEvent::Chunk(tail))
                }
            }
        }
    }

    fn end(&mut self, reason: StreamEnd) -> StreamEvent {
        self.finished = true;
        tracing::debug!(?reason, warnings = self.decoder.warnings(), "stream consumer finished");
        StreamEvent::End(reason)
    }
}
