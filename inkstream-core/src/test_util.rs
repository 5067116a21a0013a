//! Scripted provider for orchestrator and server tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::model::{ChunkChoice, ChunkDelta, ChunkUsage, CompletionChunk};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::stream::ChunkStream;

#[derive(Debug, Clone)]
pub enum Step {
    Chunk(CompletionChunk),
    /// Terminal transport failure with this message.
    Fail(String),
    /// Never yields again; ends only on cancellation.
    Hang,
}

#[derive(Clone, Default)]
pub struct ScriptedProvider {
    steps: Vec<Step>,
    refuse: bool,
    pub calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// A provider whose `stream_completion` fails before streaming.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// The text split into content chunks, a `stop` chunk and a usage chunk.
    pub fn text(parts: &[&str], prompt_tokens: u64, completion_tokens: u64) -> Self {
        let mut steps: Vec<Step> = parts.iter().map(|p| Step::Chunk(content(p))).collect();
        let mut stop = content("");
        stop.choices[0].delta.content = None;
        stop.choices[0].finish_reason = Some("stop".into());
        steps.push(Step::Chunk(stop));
        steps.push(Step::Chunk(usage(prompt_tokens, completion_tokens)));
        Self::new(steps)
    }

    pub fn last_call(&self) -> Option<CompletionRequest> {
        self.calls.lock().ok().and_then(|c| c.last().cloned())
    }
}

pub fn content(text: &str) -> CompletionChunk {
    CompletionChunk {
        id: "chatcmpl-scripted".into(),
        object: Some("chat.completion.chunk".into()),
        created_at: 1_700_000_000,
        model: "deepseek-chat".into(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: None,
                content: Some(text.into()),
            },
            finish_reason: None,
        }],
        usage: None,
    }
}

pub fn usage(prompt_tokens: u64, completion_tokens: u64) -> CompletionChunk {
    CompletionChunk {
        id: "chatcmpl-scripted".into(),
        model: "deepseek-chat".into(),
        usage: Some(ChunkUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }),
        ..Default::default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> CoreResult<ChunkStream> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(req);
        }
        if self.refuse {
            return Err(CoreError::ProviderUnavailable {
                provider: "scripted".into(),
            });
        }
        let steps = self.steps.clone();
        let s = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(c) => yield Ok(c),
                    Step::Fail(msg) => {
                        yield Err(CoreError::Transport(msg));
                        return;
                    }
                    Step::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                }
            }
        };
        Ok(s.boxed())
    }
}
