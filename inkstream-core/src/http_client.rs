use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreError, CoreResult};

/// Label used in errors raised by this client.
const PEER: &str = "upstream";

/// Request context carries the tracing ID forwarded as `X-Request-Id`.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// A boxed stream of raw body bytes.
pub type ByteStream =
    Pin<Box<dyn futures_util::stream::Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// An opened event-stream response whose status was already checked.
pub struct SseResponse {
    pub body: ByteStream,
    pub provider_request_id: Option<String>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        // No client-wide total timeout: it would also cut long streamed bodies.
        let mut builder = Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| CoreError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("inkstream/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
            idle_timeout: Duration::from_millis(cfg.idle_chunk_timeout_ms),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// Longest allowed silence between two reads of a streamed body.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }

    /// POST JSON bounded by the whole-request timeout, body read included.
    /// For replies read to the end in one go; streamed bodies use `post_raw`.
    pub async fn post_timed<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<reqwest::Response> {
        self.request(url, body, headers, ctx)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|_| CoreError::ProviderUnavailable {
                provider: PEER.into(),
            })
    }

    /// POST JSON and return the response as-is, whatever its status.
    /// Callers that own the peer's error format map non-2xx replies themselves.
    pub async fn post_raw<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<reqwest::Response> {
        self.request(url, body, headers, ctx)
            .send()
            .await
            .map_err(|_| CoreError::ProviderUnavailable {
                provider: PEER.into(),
            })
    }

    /// POST JSON and return the SSE (Server-Sent Events) body as raw bytes.
    pub async fn post_sse<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<SseResponse> {
        let mut with_accept: Vec<(&str, &str)> = Vec::with_capacity(headers.len() + 1);
        with_accept.push(("Accept", crate::sse::EVENT_STREAM));
        with_accept.extend_from_slice(headers);
        let resp = self.post_raw(url, body, &with_accept, ctx).await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        if !status.is_success() {
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(PEER, status, ra, &body));
        }

        Ok(SseResponse {
            body: Box::pin(resp.bytes_stream()),
            provider_request_id: extract_request_id(&headers),
        })
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 4] = [
        "x-request-id",
        "request-id",
        "x-ds-trace-id",
        "x-amzn-requestid",
    ];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(provider: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> CoreError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CoreError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => CoreError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => CoreError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
