//! Streaming primitives shared by providers, the aggregator and the SSE encoder.
//!
//! Contract:
//! - A provider stream yields 0..n `Ok(CompletionChunk)` items in arrival order.
//! - It ends either by returning `None` (success) or after exactly one `Err` item.
//! - After an `Err`, no further items are produced.
//! - The stream is single-pass; it cannot be restarted.

use crate::error::CoreResult;
use crate::model::CompletionChunk;

/// Boxed stream of upstream chunks. Providers return this from `stream_completion`.
pub type ChunkStream = futures::stream::BoxStream<'static, CoreResult<CompletionChunk>>;
