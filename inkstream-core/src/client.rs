//! Client for the two routes.

use serde::Deserialize;
use tracing::debug;

use crate::config::HttpCfg;
use crate::error::{CoreError, CoreResult, FieldError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{AggregatedResponse, GenerationRequest, StreamRequest};
use crate::sse::{DecodeOutcome, EVENT_STREAM, StreamHandler, consume};

pub struct InkClient {
    http: HttpClient,
    base: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Vec<FieldError>,
}

impl InkClient {
    pub fn new(base_url: impl Into<String>, cfg: &HttpCfg) -> CoreResult<Self> {
        Ok(Self {
            http: HttpClient::new(cfg)?,
            base: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn generate(&self, req: &GenerationRequest) -> CoreResult<AggregatedResponse> {
        let resp = self
            .http
            .post_timed(&self.url("/generate"), req, &[], &RequestCtx::default())
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        resp.json::<AggregatedResponse>()
            .await
            .map_err(|e| CoreError::Transport(format!("response decode error: {e}")))
    }

    /// Stream `/stream` into `handler`. A non-2xx reply is returned as an
    /// error before any callback fires.
    pub async fn stream<H>(&self, req: &StreamRequest, handler: &mut H) -> CoreResult<DecodeOutcome>
    where
        H: StreamHandler + ?Sized,
    {
        let resp = self
            .http
            .post_raw(
                &self.url("/stream"),
                req,
                &[("Accept", EVENT_STREAM)],
                &RequestCtx::default(),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let outcome = consume(resp.bytes_stream(), handler).await;
        debug!(?outcome, "stream consumed");
        Ok(outcome)
    }
}

async fn api_error(resp: reqwest::Response) -> CoreError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    CoreError::Api {
        status,
        message: body.error.unwrap_or(text),
        details: body.details,
    }
}
