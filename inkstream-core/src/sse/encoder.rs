//! Chunk stream -> SSE events.
//!
//! Frame grammar:
//! - `data: <json-chunk>\n\n`
//! - `event: error\ndata: {"message": "..."}\n\n`
//!
//! Natural end of stream carries no sentinel; the client treats EOF as success.

use axum::response::sse::Event;
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{CoreError, CoreResult};
use crate::model::CompletionChunk;
use crate::stream::ChunkStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Open,
    Closed,
    Errored,
}

/// Event writer with a terminal state: nothing is written after `Closed` or `Errored`.
#[derive(Debug)]
pub struct SseEncoder {
    state: EncoderState,
    frames: u64,
}

impl Default for SseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseEncoder {
    pub fn new() -> Self {
        Self {
            state: EncoderState::Open,
            frames: 0,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Encode one chunk as a `data:` event.
    pub fn chunk(&mut self, chunk: &CompletionChunk) -> CoreResult<Event> {
        self.ensure_open()?;
        let json = serde_json::to_string(chunk).map_err(|e| CoreError::Other(e.into()))?;
        self.frames += 1;
        Ok(Event::default().data(json))
    }

    /// Encode the error event and move to `Errored`.
    pub fn fail(&mut self, message: &str) -> CoreResult<Event> {
        self.ensure_open()?;
        self.state = EncoderState::Errored;
        self.frames += 1;
        let payload = json!({ "message": message });
        Ok(Event::default().event("error").data(payload.to_string()))
    }

    /// Mark a clean end of stream.
    pub fn close(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        self.state = EncoderState::Closed;
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        match self.state {
            EncoderState::Open => Ok(()),
            s => Err(CoreError::StreamProtocol(format!(
                "write after stream reached {s:?}"
            ))),
        }
    }
}

/// Bridge an upstream chunk stream to SSE events.
///
/// Chunks are pulled one at a time, only when the body is polled, so a slow
/// reader slows the upstream pull. Every end other than upstream exhaustion,
/// including cancellation of `cancel` while the body is still read, writes the
/// error event and then fails the body. Dropping the returned stream cancels
/// `cancel`.
pub fn encode_stream(
    chunks: ChunkStream,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, CoreError>> + Send + 'static {
    async_stream::stream! {
        let _guard = cancel.clone().drop_guard();
        let mut chunks = chunks;
        let mut encoder = SseEncoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(frames = encoder.frames_written(), "stream cut off by shutdown");
                    Some(Err(CoreError::ShuttingDown))
                }
                next = chunks.next() => next,
            };
            match next {
                Some(Ok(chunk)) => match encoder.chunk(&chunk) {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        if let Ok(event) = encoder.fail(&e.to_string()) {
                            yield Ok(event);
                            tokio::task::yield_now().await;
                        }
                        yield Err(e);
                        return;
                    }
                },
                Some(Err(e)) => {
                    error!(error = %e, kind = e.kind(), "stream failed mid-flight");
                    if let Ok(event) = encoder.fail(&e.to_string()) {
                        yield Ok(event);
                        // Hand control back once so the transport flushes the
                        // error frame before the body fails.
                        tokio::task::yield_now().await;
                    }
                    yield Err(e);
                    return;
                }
                None => {
                    let _ = encoder.close();
                    debug!(frames = encoder.frames_written(), "stream closed");
                    return;
                }
            }
        }
    }
}
