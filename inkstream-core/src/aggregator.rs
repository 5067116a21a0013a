//! Reduce a chunk stream into one complete response.

use std::time::Instant;

use chrono::Utc;
use futures_util::StreamExt;
use tracing::debug;

use crate::config::PricingCfg;
use crate::error::CoreResult;
use crate::model::{
    AggregatedResponse, ChunkUsage, CompletionChunk, FinishReason, QualityScores,
    ResponseMetadata, Usage,
};
use crate::stream::ChunkStream;

/// Facts known about the request before any chunk arrives.
#[derive(Debug, Clone)]
pub struct AggregateCtx {
    pub requested_model: String,
    pub request_id: String,
    pub started: Instant,
    pub pricing: Option<PricingCfg>,
}

#[derive(Debug, Default)]
pub struct Aggregator {
    content: String,
    usage: Option<ChunkUsage>,
    model: Option<String>,
    first_id: Option<String>,
    finish: Option<FinishReason>,
    chunks: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &CompletionChunk) {
        self.chunks += 1;
        for part in chunk.contents() {
            self.content.push_str(part);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if !chunk.model.is_empty() {
            self.model = Some(chunk.model.clone());
        }
        if self.first_id.is_none() && !chunk.id.is_empty() {
            self.first_id = Some(chunk.id.clone());
        }
        if let Some(reason) = chunk.finish() {
            self.finish = Some(reason);
        }
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    pub fn finish(self, ctx: &AggregateCtx) -> AggregatedResponse {
        let raw = self.usage.unwrap_or_default();
        let cost = ctx
            .pricing
            .as_ref()
            .map(|p| p.cost(raw.prompt_tokens, raw.completion_tokens))
            .unwrap_or(0.0);
        debug!(chunks = self.chunks, chars = self.content.len(), "aggregated stream");
        AggregatedResponse {
            content: self.content,
            model: self.model.unwrap_or_else(|| ctx.requested_model.clone()),
            usage: Usage {
                prompt_tokens: raw.prompt_tokens,
                completion_tokens: raw.completion_tokens,
                total_tokens: raw.total_tokens,
                cost,
            },
            quality: QualityScores::default(),
            metadata: ResponseMetadata {
                generated_at: Utc::now(),
                request_id: self.first_id.unwrap_or_else(|| ctx.request_id.clone()),
                processing_time: ctx.started.elapsed().as_millis() as u64,
            },
        }
    }
}

/// Drive `stream` to its end. The first error is returned and the partial
/// content is dropped.
pub async fn aggregate(
    mut stream: ChunkStream,
    ctx: &AggregateCtx,
) -> CoreResult<(AggregatedResponse, Option<FinishReason>)> {
    let mut agg = Aggregator::new();
    while let Some(item) = stream.next().await {
        agg.push(&item?);
    }
    let finish = agg.finish_reason();
    Ok((agg.finish(ctx), finish))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{ChunkChoice, ChunkDelta};

    fn ctx(pricing: Option<PricingCfg>) -> AggregateCtx {
        AggregateCtx {
            requested_model: "deepseek-chat".into(),
            request_id: "local-1".into(),
            started: Instant::now(),
            pricing,
        }
    }

    fn chunk(id: &str, model: &str, parts: &[Option<&str>]) -> CompletionChunk {
        CompletionChunk {
            id: id.into(),
            model: model.into(),
            choices: parts
                .iter()
                .enumerate()
                .map(|(i, p)| ChunkChoice {
                    index: i as u32,
                    delta: ChunkDelta {
                        role: None,
                        content: p.map(str::to_string),
                    },
                    finish_reason: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn usage(p: u64, c: u64) -> CompletionChunk {
        CompletionChunk {
            usage: Some(ChunkUsage {
                prompt_tokens: p,
                completion_tokens: c,
                total_tokens: p + c,
            }),
            ..Default::default()
        }
    }

    fn boxed(items: Vec<CoreResult<CompletionChunk>>) -> ChunkStream {
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn concatenates_every_choice_in_order() {
        let s = boxed(vec![
            Ok(chunk("a", "deepseek-chat", &[Some("Once "), None])),
            Ok(chunk("b", "", &[None])),
            Ok(chunk("c", "deepseek-chat-v2", &[Some("upon "), Some("a time")])),
        ]);
        let (resp, _) = aggregate(s, &ctx(None)).await.unwrap();
        assert_eq!(resp.content, "Once upon a time");
        assert_eq!(resp.model, "deepseek-chat-v2");
        assert_eq!(resp.metadata.request_id, "a");
    }

    #[tokio::test]
    async fn empty_stream_yields_zeroed_response() {
        let (resp, finish) = aggregate(boxed(vec![]), &ctx(None)).await.unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.usage, Usage::default());
        assert_eq!(resp.quality, QualityScores::default());
        assert_eq!(resp.model, "deepseek-chat");
        assert_eq!(resp.metadata.request_id, "local-1");
        assert!(finish.is_none());
    }

    #[tokio::test]
    async fn latest_usage_wins_and_prices_apply() {
        let pricing = PricingCfg {
            prompt_per_million: 1_000_000.0,
            completion_per_million: 2_000_000.0,
        };
        let s = boxed(vec![Ok(usage(1, 1)), Ok(chunk("x", "m", &[Some("t")])), Ok(usage(3, 4))]);
        let (resp, _) = aggregate(s, &ctx(Some(pricing))).await.unwrap();
        assert_eq!(resp.usage.prompt_tokens, 3);
        assert_eq!(resp.usage.completion_tokens, 4);
        assert_eq!(resp.usage.total_tokens, 7);
        assert!((resp.usage.cost - 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn first_error_is_propagated() {
        let s = boxed(vec![
            Ok(chunk("a", "m", &[Some("partial")])),
            Err(CoreError::UpstreamTimeout { idle_ms: 10 }),
        ]);
        let err = aggregate(s, &ctx(None)).await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamTimeout { idle_ms: 10 }));
    }

    #[test]
    fn tracks_finish_reason() {
        let mut agg = Aggregator::new();
        let mut c = chunk("a", "m", &[Some("x")]);
        c.choices[0].finish_reason = Some("length".into());
        agg.push(&c);
        assert_eq!(agg.finish_reason(), Some(FinishReason::Length));
    }
}
