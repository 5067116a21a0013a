//! Incremental SSE decoding.
//!
//! `SseDecoder` is sans-IO: feed it raw body bytes as they arrive and it returns
//! every record completed so far. Byte boundaries never matter: a multi-byte
//! character or the `\n\n` terminator may be split across any two reads.
//! `consume` drives a decoder over an HTTP body and dispatches to a
//! `StreamHandler`.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{ChunkUsage, CompletionChunk};

/// One complete SSE record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// `data: <payload>` (multiple data lines joined by `\n`).
    Data(String),
    /// `event: error` followed by its data payload (possibly empty).
    Error(String),
    /// A record of any other kind (comments, unknown events, empty records).
    Ignored,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Undecoded tail of the last read: an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded text not yet split into records.
    text: String,
    /// Byte offset in `text` where the next terminator scan resumes.
    scan_from: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append body bytes and return every record they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseRecord> {
        self.decode_utf8(bytes);
        self.drain_records()
    }

    /// End of body: flush a dangling partial character and return any record
    /// it completed. Text after the last terminator is discarded.
    pub fn finish(&mut self) -> Vec<SseRecord> {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        let records = self.drain_records();
        if !self.text.trim().is_empty() {
            debug!(bytes = self.text.len(), "discarding unterminated trailing record");
        }
        self.text.clear();
        self.scan_from = 0;
        records
    }

    /// Bytes buffered but not yet returned as records.
    pub fn buffered_len(&self) -> usize {
        self.pending.len() + self.text.len()
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // The prefix is valid UTF-8, so this borrows without replacement.
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: keep it for the next read.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Split every terminated record off `text`, compacting the buffer once.
    /// A record ends at a blank line: `\n\n` or `\n\r\n`.
    fn drain_records(&mut self) -> Vec<SseRecord> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut i = self.scan_from;
        let bytes = self.text.as_bytes();
        while i < bytes.len() {
            if bytes[i] != b'\n' {
                i += 1;
                continue;
            }
            let terminator = match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(b'\n'), _) => 2,
                (Some(b'\r'), Some(b'\n')) => 3,
                // Not decidable until more bytes arrive.
                (None, _) | (Some(b'\r'), None) => break,
                _ => {
                    i += 1;
                    continue;
                }
            };
            // '\n' is ASCII, so both cut points are char boundaries.
            out.push(classify(&self.text[start..i]));
            start = i + terminator;
            i = start;
        }
        self.text.drain(..start);
        self.scan_from = i - start;
        out
    }
}

fn classify(record: &str) -> SseRecord {
    let mut event: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();
    for line in record.trim().lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.trim()),
            "data" => data.push(value),
            _ => {}
        }
    }
    match event {
        Some("error") => SseRecord::Error(data.join("\n").trim().to_string()),
        None | Some("message") if !data.is_empty() => {
            SseRecord::Data(data.join("\n").trim().to_string())
        }
        _ => SseRecord::Ignored,
    }
}

/// Callbacks invoked by `consume`, in strict arrival order.
///
/// Exactly one of `on_error` / `on_done` fires per stream, at most once.
pub trait StreamHandler {
    fn on_chunk(&mut self, chunk: CompletionChunk);
    fn on_error(&mut self, err: CoreError);
    fn on_done(&mut self) {}
}

/// How a `consume` run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Natural end of body; `on_done` was called.
    Completed,
    /// The server sent an `event: error` record; `on_error` was called.
    ServerError,
    /// Reading the body failed; `on_error` was called.
    TransportError,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

fn server_error(payload: &str) -> CoreError {
    let message = serde_json::from_str::<ErrorPayload>(payload)
        .ok()
        .and_then(|p| p.message)
        .unwrap_or_else(|| "unknown stream error event".to_string());
    CoreError::ServerSignaled { message }
}

/// Read `body` to completion (or to the first error), dispatching each
/// decoded chunk to `handler`.
///
/// A malformed data record is logged and skipped; an error record or a read
/// failure stops decoding.
pub async fn consume<S, E, H>(body: S, handler: &mut H) -> DecodeOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    H: StreamHandler + ?Sized,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    loop {
        let records = match body.next().await {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => {
                handler.on_error(CoreError::Transport(e.to_string()));
                return DecodeOutcome::TransportError;
            }
            None => {
                let tail = decoder.finish();
                if dispatch(tail, handler) {
                    return DecodeOutcome::ServerError;
                }
                handler.on_done();
                return DecodeOutcome::Completed;
            }
        };
        if dispatch(records, handler) {
            return DecodeOutcome::ServerError;
        }
    }
}

/// Returns true when an error record was dispatched (decoding must stop).
fn dispatch<H: StreamHandler + ?Sized>(records: Vec<SseRecord>, handler: &mut H) -> bool {
    for record in records {
        match record {
            SseRecord::Data(payload) => match serde_json::from_str::<CompletionChunk>(&payload) {
                Ok(chunk) => handler.on_chunk(chunk),
                Err(e) => {
                    let err = CoreError::StreamProtocol(e.to_string());
                    warn!(error = %err, payload = %payload, "skipping malformed stream record");
                }
            },
            SseRecord::Error(payload) => {
                handler.on_error(server_error(&payload));
                return true;
            }
            SseRecord::Ignored => debug!("ignoring unrecognized stream record"),
        }
    }
    false
}

/// Handler that reassembles the streamed text.
#[derive(Debug, Default)]
pub struct TextCollector {
    pub text: String,
    pub chunks: usize,
    pub usage: Option<ChunkUsage>,
    pub error: Option<CoreError>,
    pub done: bool,
}

impl StreamHandler for TextCollector {
    fn on_chunk(&mut self, chunk: CompletionChunk) {
        self.chunks += 1;
        for content in chunk.contents() {
            self.text.push_str(content);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    fn on_error(&mut self, err: CoreError) {
        self.error = Some(err);
    }

    fn on_done(&mut self) {
        self.done = true;
    }
}
