use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::model::{ChatMessage, ChunkChoice, ChunkDelta, ChunkUsage, CompletionChunk};
use crate::stream::ChunkStream;

/// One streamed chat-completion call, already resolved against defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_id: String,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open the upstream stream. Errors before the first chunk (connect
    /// failure, non-2xx status) are returned here; later ones arrive as the
    /// stream's single terminal `Err`. Once `cancel` fires the stream ends
    /// without reading further.
    async fn stream_completion(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> CoreResult<ChunkStream>;
}

/// A dummy provider that streams a canned response.
/// Used when no API key is configured, and in tests.
pub struct NullProvider;

const NULL_TEXT: [&str; 3] = ["[null ", "provider ", "response]"];

fn null_chunk(req: &CompletionRequest, delta: ChunkDelta, finish: Option<&str>) -> CompletionChunk {
    CompletionChunk {
        id: format!("null-{}", req.request_id),
        object: Some("chat.completion.chunk".into()),
        created_at: 0,
        model: req.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish.map(str::to_string),
        }],
        usage: None,
    }
}

#[async_trait]
impl CompletionProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn stream_completion(
        &self,
        req: CompletionRequest,
        _cancel: CancellationToken,
    ) -> CoreResult<ChunkStream> {
        let mut chunks = Vec::with_capacity(NULL_TEXT.len() + 3);
        chunks.push(null_chunk(
            &req,
            ChunkDelta {
                role: Some("assistant".into()),
                content: None,
            },
            None,
        ));
        for part in NULL_TEXT {
            chunks.push(null_chunk(
                &req,
                ChunkDelta {
                    role: None,
                    content: Some(part.into()),
                },
                None,
            ));
        }
        chunks.push(null_chunk(&req, ChunkDelta::default(), Some("stop")));

        let prompt_tokens: u64 = req
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let completion_tokens = NULL_TEXT.len() as u64;
        let mut usage = null_chunk(&req, ChunkDelta::default(), None);
        usage.choices.clear();
        usage.usage = Some(ChunkUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });
        chunks.push(usage);

        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}
