//! OpenAI-compatible streaming chat completions (DeepSeek speaks this dialect).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::http_client::{ByteStream, HttpClient, RequestCtx};
use crate::model::{ChatMessage, CompletionChunk};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::sse::{SseDecoder, SseRecord};
use crate::stream::ChunkStream;

const DONE: &str = "[DONE]";

pub struct OpenAiCompatible {
    http: HttpClient,
    base: String,
    name: String,
    api_key: SecretString,
    include_usage: bool,
}

impl OpenAiCompatible {
    pub fn new(http: HttpClient, api_key: SecretString, base: String, include_usage: bool) -> Self {
        Self {
            http,
            base,
            name: "deepseek".into(),
            api_key,
            include_usage,
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAiCompatible::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".to_string().into_boxed_str()),
            server_base.to_string(),
            true,
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("include_usage", &self.include_usage)
            .finish_non_exhaustive()
    }
}

// ---- Wire structs (minimal) ----
#[derive(Serialize)]
struct OAStreamReq<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OAStreamOptions>,
}

#[derive(Serialize)]
struct OAStreamOptions {
    include_usage: bool,
}

#[async_trait]
impl CompletionProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_completion(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> CoreResult<ChunkStream> {
        let payload = OAStreamReq {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: true,
            stream_options: self
                .include_usage
                .then_some(OAStreamOptions { include_usage: true }),
        };
        let ctx = RequestCtx {
            request_id: Some(&req.request_id),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let opened = self.http.post_sse(&self.url(), &payload, &hdrs, &ctx).await?;
        debug!(
            provider = %self.name,
            provider_request_id = ?opened.provider_request_id,
            "upstream stream opened"
        );
        Ok(chunk_stream(opened.body, self.http.idle_timeout(), cancel, self.name.clone()).boxed())
    }
}

enum Step {
    Chunk(CompletionChunk),
    Done,
    Fail(CoreError),
    Skip,
}

fn interpret(record: SseRecord, provider: &str) -> Step {
    match record {
        SseRecord::Data(payload) if payload == DONE => Step::Done,
        SseRecord::Data(payload) => match serde_json::from_str::<CompletionChunk>(&payload) {
            Ok(chunk) => Step::Chunk(chunk),
            Err(e) => Step::Fail(CoreError::ProviderError {
                provider: provider.to_string(),
                code: "stream".into(),
                message: format!("chunk decode error: {e}"),
            }),
        },
        SseRecord::Error(payload) => Step::Fail(CoreError::ProviderError {
            provider: provider.to_string(),
            code: "stream".into(),
            message: payload,
        }),
        SseRecord::Ignored => Step::Skip,
    }
}

/// Turn the upstream SSE body into chunks.
///
/// Success is `[DONE]`, or end of body after some chunk carried a finish
/// reason. End of body before either is a transport failure. Each read must
/// arrive within `idle`.
fn chunk_stream(
    body: ByteStream,
    idle: Duration,
    cancel: CancellationToken,
    provider: String,
) -> impl Stream<Item = CoreResult<CompletionChunk>> + Send + 'static {
    async_stream::stream! {
        let mut body = body;
        let mut decoder = SseDecoder::new();
        let mut finished = false;
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%provider, "upstream read cancelled");
                    return;
                }
                read = tokio::time::timeout(idle, body.next()) => read,
            };
            let (records, eof) = match read {
                Err(_) => {
                    warn!(%provider, idle_ms = idle.as_millis() as u64, "upstream went idle");
                    yield Err(CoreError::UpstreamTimeout { idle_ms: idle.as_millis() as u64 });
                    return;
                }
                Ok(Some(Ok(bytes))) => (decoder.push(&bytes), false),
                Ok(Some(Err(e))) => {
                    yield Err(CoreError::Transport(e.to_string()));
                    return;
                }
                Ok(None) => (decoder.finish(), true),
            };
            for record in records {
                match interpret(record, &provider) {
                    Step::Chunk(chunk) => {
                        finished |= chunk.finish().is_some();
                        yield Ok(chunk);
                    }
                    Step::Done => return,
                    Step::Fail(e) => {
                        yield Err(e);
                        return;
                    }
                    Step::Skip => {}
                }
            }
            if eof {
                if !finished {
                    yield Err(CoreError::Transport("stream ended before completion".into()));
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    use crate::model::FinishReason;

    fn req() -> CompletionRequest {
        CompletionRequest {
            model: "deepseek-chat".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("Hi")],
            temperature: 0.7,
            max_tokens: 2000,
            request_id: "req-1".into(),
        }
    }

    fn data(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    async fn drain(s: ChunkStream) -> (Vec<CompletionChunk>, Option<CoreError>) {
        let mut s = s;
        let mut chunks = Vec::new();
        let mut err = None;
        while let Some(item) = s.next().await {
            match item {
                Ok(c) => chunks.push(c),
                Err(e) => {
                    assert!(err.is_none(), "more than one error item");
                    err = Some(e);
                }
            }
        }
        (chunks, err)
    }

    async fn open(body: String) -> CoreResult<ChunkStream> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;
        let provider = OpenAiCompatible::new_for_tests(&server.base_url());
        let stream = provider.stream_completion(req(), CancellationToken::new()).await;
        // The mock server must outlive the body read.
        let (chunks, err) = match stream {
            Ok(s) => drain(s).await,
            Err(e) => return Err(e),
        };
        let replay = chunks.into_iter().map(Ok).chain(err.map(Err));
        Ok(futures::stream::iter(replay.collect::<Vec<_>>()).boxed())
    }

    #[tokio::test]
    async fn stream_200_maps_chunks_and_usage() {
        let body = [
            data(r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"deepseek-chat","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#),
            data(r#"{"id":"c1","created":1,"model":"deepseek-chat","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#),
            ": keep-alive\n\n".to_string(),
            data(r#"{"id":"c1","created":1,"model":"deepseek-chat","choices":[{"index":0,"delta":{"content":" world"},"finish_reason":"stop"}]}"#),
            data(r#"{"id":"c1","created":1,"model":"deepseek-chat","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#),
            data(DONE),
        ]
        .concat();
        let (chunks, err) = drain(open(body).await.expect("opens")).await;
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(chunks.len(), 4);
        let text: String = chunks.iter().flat_map(|c| c.contents()).collect();
        assert_eq!(text, "Hello world");
        assert_eq!(chunks[2].finish(), Some(FinishReason::Stop));
        assert_eq!(chunks[3].usage.map(|u| u.total_tokens), Some(12));
    }

    #[tokio::test]
    async fn sends_stream_flags_and_bearer_key() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("Authorization", "Bearer test-key")
                    .header("X-Request-Id", "req-1")
                    .json_body_partial(
                        r#"{"model":"deepseek-chat","max_tokens":2000,"stream":true,"stream_options":{"include_usage":true}}"#,
                    );
                then.status(200).body(data(DONE));
            })
            .await;
        let provider = OpenAiCompatible::new_for_tests(&format!("{}/", server.base_url()));
        let stream = match provider.stream_completion(req(), CancellationToken::new()).await {
            Ok(s) => s,
            Err(e) => panic!("open failed: {e}"),
        };
        let (chunks, err) = drain(stream).await;
        assert!(chunks.is_empty());
        assert!(err.is_none());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn eof_after_finish_without_done_is_success() {
        let body = data(
            r#"{"id":"c","model":"m","choices":[{"index":0,"delta":{"content":"ok"},"finish_reason":"length"}]}"#,
        );
        let (chunks, err) = drain(open(body).await.expect("opens")).await;
        assert_eq!(chunks.len(), 1);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn eof_before_completion_is_transport_error() {
        let body = data(r#"{"id":"c","model":"m","choices":[{"index":0,"delta":{"content":"par"}}]}"#);
        let (chunks, err) = drain(open(body).await.expect("opens")).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(err, Some(CoreError::Transport(_))));
    }

    #[tokio::test]
    async fn malformed_chunk_is_fatal() {
        let body = [
            data(r#"{"id":"c","model":"m","choices":[{"index":0,"delta":{"content":"a"}}]}"#),
            data("{not json"),
            data(r#"{"id":"c","model":"m","choices":[{"index":0,"delta":{"content":"b"}}]}"#),
        ]
        .concat();
        let (chunks, err) = drain(open(body).await.expect("opens")).await;
        assert_eq!(chunks.len(), 1);
        match err {
            Some(CoreError::ProviderError { message, .. }) => {
                assert!(message.starts_with("chunk decode error"))
            }
            other => panic!("expected ProviderError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn upstream_error_event_is_fatal() {
        let body = "event: error\ndata: {\"message\":\"overloaded\"}\n\n".to_string();
        let (_chunks, err) = drain(open(body).await.expect("opens")).await;
        match err {
            Some(CoreError::ProviderError { message, .. }) => assert!(message.contains("overloaded")),
            other => panic!("expected ProviderError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_429_with_retry_after_maps_to_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).header("Retry-After", "2").body("limit");
            })
            .await;
        let provider = OpenAiCompatible::new_for_tests(&server.base_url());
        match provider.stream_completion(req(), CancellationToken::new()).await {
            Err(CoreError::RateLimited { retry_after, .. }) => assert_eq!(retry_after, Some(2)),
            Err(other) => panic!("expected RateLimited, got: {:?}", other),
            Ok(_) => panic!("429 must not open a stream"),
        }
    }

    #[tokio::test]
    async fn stream_503_maps_to_provider_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("down");
            })
            .await;
        let provider = OpenAiCompatible::new_for_tests(&server.base_url());
        let res = provider.stream_completion(req(), CancellationToken::new()).await;
        assert!(matches!(res, Err(CoreError::ProviderUnavailable { .. })));
    }

    fn bytes_body(parts: Vec<&'static str>) -> ByteStream {
        Box::pin(futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<Bytes, reqwest::Error>(Bytes::from_static(p.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn records_split_across_reads_are_reassembled() {
        let body = bytes_body(vec![
            "data: {\"id\":\"c\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"con",
            "tent\":\"h\u{e9}\"},\"finish_reason\":\"stop\"}]}\n",
            "\ndata: [DO",
            "NE]\n\n",
        ]);
        let s = chunk_stream(body, Duration::from_secs(5), CancellationToken::new(), "t".into());
        let (chunks, err) = drain(s.boxed()).await;
        assert!(err.is_none());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].contents().collect::<String>(), "hé");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_upstream_times_out() {
        let body: ByteStream = Box::pin(futures::stream::pending::<Result<Bytes, reqwest::Error>>());
        let s = chunk_stream(body, Duration::from_millis(50), CancellationToken::new(), "t".into());
        let (chunks, err) = drain(s.boxed()).await;
        assert!(chunks.is_empty());
        assert!(matches!(err, Some(CoreError::UpstreamTimeout { idle_ms: 50 })));
    }

    #[tokio::test]
    async fn cancelled_token_stops_reading() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body: ByteStream = Box::pin(futures::stream::pending::<Result<Bytes, reqwest::Error>>());
        let s = chunk_stream(body, Duration::from_secs(5), cancel, "t".into());
        let (chunks, err) = drain(s.boxed()).await;
        assert!(chunks.is_empty());
        assert!(err.is_none());
    }
}
