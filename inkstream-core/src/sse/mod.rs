//! Server-Sent-Events bridge: the encoder turns upstream chunks into a browser
//! consumable body, the decoder reassembles such a body back into chunks.
//! The upstream provider reuses the decoder to read its own SSE response.

pub mod decoder;
pub mod encoder;

pub use decoder::{DecodeOutcome, SseDecoder, SseRecord, StreamHandler, TextCollector, consume};
pub use encoder::{EncoderState, SseEncoder, encode_stream};

/// `Content-Type` of an SSE response.
pub const EVENT_STREAM: &str = "text/event-stream";
